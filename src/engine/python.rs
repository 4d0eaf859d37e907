use super::{Engine, types::*};
use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const RUNNER_SCRIPT: &str = "docling_runner.py";

/// Runs Docling out of process through `scripts/docling_runner.py`.
///
/// Every call spawns a fresh interpreter, so per-conversion settings such as the
/// OCR engine only ever reach that child's environment.
pub struct PythonEngine {
    cfg: Config,
    runner: PathBuf,
    python_exe: PathBuf,
}

impl PythonEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        let runner = scripts_dir.join(RUNNER_SCRIPT);
        if !runner.exists() {
            return Err(anyhow!("missing script: {}", runner.display()));
        }
        let python_exe = resolve_python_exe(&cfg.docling.python_exe);
        Ok(Self {
            cfg: cfg.clone(),
            runner,
            python_exe,
        })
    }

    pub fn python_exe(&self) -> &Path {
        &self.python_exe
    }

    fn timeout(&self) -> Option<Duration> {
        (self.cfg.docling.timeout_seconds > 0)
            .then(|| Duration::from_secs(self.cfg.docling.timeout_seconds))
    }

    fn run_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        input: &I,
        timeout: Option<Duration>,
        extra_env: &[(&str, &str)],
    ) -> Result<O> {
        debug!(
            "python run {} timeout={:?}",
            self.runner.display(),
            timeout
        );
        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.runner);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        for (k, v) in &self.cfg.docling.env {
            cmd.env(k, v);
        }
        for (k, v) in extra_env {
            cmd.env(k, v);
        }
        if !self.cfg.paths.docling_artifacts_dir.is_empty() {
            cmd.env("DOCLING_ARTIFACTS_PATH", &self.cfg.paths.docling_artifacts_dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning python: {}", self.python_exe.display()))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            let bytes = serde_json::to_vec(input)?;
            stdin.write_all(&bytes)?;
            stdin.flush().ok();
        }

        let output = match timeout {
            Some(limit) => wait_with_timeout(&mut child, limit)?,
            None => child
                .wait_with_output()
                .with_context(|| "waiting for python")?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "docling runner exited with {}: {}",
                output.status,
                last_line(&stderr)
            ));
        }

        if self.cfg.debug.keep_python_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("docling runner stderr: {}", stderr.trim());
        }

        let out: O = serde_json::from_slice(&output.stdout)
            .with_context(|| "parsing docling runner JSON output")?;
        Ok(out)
    }
}

/// The final traceback line is the exception itself; the rest is noise in a response body.
fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no stderr output")
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("DOCLING_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl Engine for PythonEngine {
    fn doctor(&self) -> Result<DocDiag> {
        self.run_json::<serde_json::Value, DocDiag>(
            &serde_json::json!({"cmd": "doctor"}),
            Some(Duration::from_secs(120)),
            &[],
        )
    }

    fn convert(&self, req: &ConvertIn) -> Result<ConvertOut> {
        let mut extra_env = Vec::new();
        if req.options.do_ocr && !req.options.ocr.engine.is_empty() {
            extra_env.push(("DOCLING_OCR_ENGINE", req.options.ocr.engine.as_str()));
        }
        let out: ConvertOut = self.run_json(
            &serde_json::json!({"cmd": "convert", "req": req}),
            self.timeout(),
            &extra_env,
        )?;
        if !out.ok {
            warn!(
                "docling convert returned ok=false for {}: {}",
                req.input_pdf,
                out.error.as_deref().unwrap_or("no error message")
            );
        }
        Ok(out)
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so verbose python logging can't deadlock the child
    // on a full stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    let timed_out = loop {
        if child.try_wait().with_context(|| "try_wait")?.is_some() {
            break false;
        }
        if start.elapsed() > timeout {
            warn!("docling runner timed out after {:?}", timeout);
            let _ = child.kill();
            break true;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let status = child.wait().with_context(|| "wait for python")?;
    let stdout = stdout_thread
        .join()
        .map_err(|_| anyhow!("stdout reader thread panicked"))??;
    let stderr = stderr_thread
        .join()
        .map_err(|_| anyhow!("stderr reader thread panicked"))??;

    if timed_out {
        return Err(anyhow!(
            "docling runner exceeded timeout ({:?}); stderr: {}",
            timeout,
            last_line(&String::from_utf8_lossy(&stderr))
        ));
    }
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_line_picks_exception() {
        let stderr = "Traceback (most recent call last):\n  File \"x\"\nValueError: not a pdf\n\n";
        assert_eq!(last_line(stderr), "ValueError: not a pdf");
        assert_eq!(last_line(""), "no stderr output");
    }

    #[test]
    fn explicit_python_is_kept() {
        assert_eq!(resolve_python_exe("/opt/py/bin/python"), PathBuf::from("/opt/py/bin/python"));
    }

    /// Engine whose "python" is `/bin/sh` running `body` as the runner script.
    #[cfg(unix)]
    fn shell_engine(
        body: &str,
        tweak: impl FnOnce(&mut Config),
    ) -> (tempfile::TempDir, PythonEngine) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RUNNER_SCRIPT), body).unwrap();
        let mut cfg = Config::default();
        cfg.paths.scripts_dir = dir.path().display().to_string();
        cfg.docling.python_exe = "/bin/sh".into();
        tweak(&mut cfg);
        let engine = PythonEngine::new(&cfg).unwrap();
        (dir, engine)
    }

    #[cfg(unix)]
    const ENV_ECHO: &str = r#"cat > /dev/null
printf '{"ok":true,"markdown":"engine=%s artifacts=%s extra=%s","warnings":[],"meta":{}}' \
  "${DOCLING_OCR_ENGINE:-unset}" "${DOCLING_ARTIFACTS_PATH:-unset}" "${QUACK_OCR_EXTRA:-unset}"
"#;

    #[cfg(unix)]
    fn request(ocr: bool) -> ConvertIn {
        ConvertIn {
            input_pdf: "/tmp/in.pdf".into(),
            options: Config::default().convert_options(Some(ocr)),
        }
    }

    #[cfg(unix)]
    #[test]
    fn ocr_engine_reaches_only_the_child() {
        let (_dir, engine) = shell_engine(ENV_ECHO, |_| {});

        let out = engine.convert(&request(true)).unwrap();
        assert!(out.ok);
        assert!(out.markdown.starts_with("engine=tesseract_cli "));

        let out = engine.convert(&request(false)).unwrap();
        assert!(out.markdown.starts_with("engine=unset "));

        assert!(std::env::var_os("DOCLING_OCR_ENGINE").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn configured_env_and_artifacts_are_forwarded() {
        let (_dir, engine) = shell_engine(ENV_ECHO, |cfg| {
            cfg.paths.docling_artifacts_dir = "/srv/docling-models".into();
            cfg.docling
                .env
                .insert("QUACK_OCR_EXTRA".into(), "from-config".into());
        });
        let out = engine.convert(&request(false)).unwrap();
        assert_eq!(
            out.markdown,
            "engine=unset artifacts=/srv/docling-models extra=from-config"
        );
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_reports_last_stderr_line() {
        let script = "cat > /dev/null\necho 'Traceback (most recent call last):' >&2\necho 'ValueError: broken xref table' >&2\nexit 3\n";
        let (_dir, engine) = shell_engine(script, |_| {});
        let err = engine.convert(&request(false)).unwrap_err().to_string();
        assert!(err.contains("ValueError: broken xref table"), "{err}");
        assert!(!err.contains("Traceback"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_runner() {
        let (_dir, engine) = shell_engine("exec sleep 30\n", |cfg| {
            cfg.docling.timeout_seconds = 1;
        });
        let started = Instant::now();
        let err = engine.convert(&request(false)).unwrap_err().to_string();
        assert!(err.contains("exceeded timeout"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn runner_failure_reply_is_passed_through() {
        let script = r#"cat > /dev/null
printf '{"ok":false,"markdown":"","warnings":[],"meta":{},"error":"Input document is not valid."}'
"#;
        let (_dir, engine) = shell_engine(script, |_| {});
        let out = engine.convert(&request(false)).unwrap();
        assert!(!out.ok);
        assert_eq!(out.error.as_deref(), Some("Input document is not valid."));
    }

    #[test]
    fn missing_runner_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.paths.scripts_dir = dir.path().display().to_string();
        let err = PythonEngine::new(&cfg).err().unwrap();
        assert!(err.to_string().contains("missing script"));
    }
}
