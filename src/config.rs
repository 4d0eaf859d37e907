use crate::engine::{Accelerator, ConvertOptions, OcrSettings, Profile};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub docling: Docling,
    #[serde(default)]
    pub postprocess: Postprocess,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Applies `PORT` from the environment on top of the file settings.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var("PORT") {
            self.apply_port(&raw)?;
        }
        Ok(())
    }

    pub(crate) fn apply_port(&mut self, raw: &str) -> Result<()> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(());
        }
        self.server.port = raw
            .parse()
            .map_err(|_| anyhow!("PORT is not a valid port number: {raw}"))?;
        Ok(())
    }

    /// Conversion options for one request. `ocr` overrides the configured default profile.
    pub fn convert_options(&self, ocr: Option<bool>) -> ConvertOptions {
        let profile = match ocr {
            Some(true) => Profile::Ocr,
            Some(false) => Profile::Standard,
            None => self.server.default_profile,
        };
        match profile {
            Profile::Standard => ConvertOptions::standard(),
            Profile::Ocr => ConvertOptions {
                profile,
                do_ocr: true,
                do_table_structure: self.docling.pipeline.do_table_structure,
                do_cell_matching: self.docling.pipeline.do_cell_matching,
                ocr: OcrSettings {
                    engine: self.docling.ocr.engine.clone(),
                    langs: self.docling.ocr.langs.clone(),
                },
                accelerator: Accelerator {
                    num_threads: self.docling.accelerator.num_threads,
                    device: self.docling.accelerator.device.clone(),
                },
            },
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        if self.paths.temp_dir.is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&self.paths.temp_dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: IpAddr,
    pub port: u16,
    pub max_body_bytes: usize,
    pub default_profile: Profile,
    /// How long in-flight conversions may drain after SIGINT/SIGTERM. `0` waits for all of them.
    pub shutdown_timeout_seconds: u64,
}
impl Default for Server {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            max_body_bytes: 512 * 1024 * 1024,
            default_profile: Profile::Standard,
            shutdown_timeout_seconds: 30,
        }
    }
}
impl Server {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        (self.shutdown_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.shutdown_timeout_seconds))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub temp_dir: String,
    pub scripts_dir: String,
    pub docling_artifacts_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            temp_dir: "".into(),
            scripts_dir: "scripts".into(),
            docling_artifacts_dir: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Docling {
    pub python_exe: String,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub pipeline: DoclingPipeline,
    #[serde(default)]
    pub ocr: DoclingOcr,
    #[serde(default)]
    pub accelerator: DoclingAccelerator,
}
impl Default for Docling {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            timeout_seconds: 0,
            env: Default::default(),
            pipeline: Default::default(),
            ocr: Default::default(),
            accelerator: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclingPipeline {
    pub do_table_structure: bool,
    pub do_cell_matching: bool,
}
impl Default for DoclingPipeline {
    fn default() -> Self {
        Self {
            do_table_structure: true,
            do_cell_matching: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclingOcr {
    pub engine: String,
    pub langs: Vec<String>,
}
impl Default for DoclingOcr {
    fn default() -> Self {
        Self {
            engine: "tesseract_cli".into(),
            langs: vec!["en".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclingAccelerator {
    pub device: String,
    pub num_threads: u32,
}
impl Default for DoclingAccelerator {
    fn default() -> Self {
        Self {
            device: "auto".into(),
            num_threads: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Postprocess {
    pub normalize_unicode: bool,
    pub normalize_newlines: bool,
    pub trim_trailing_whitespace: bool,
    pub sanitize_control_chars: bool,
    pub remove_by_regex: bool,
    #[serde(default)]
    pub regex: PostprocessRegex,
}
impl Default for Postprocess {
    fn default() -> Self {
        Self {
            normalize_unicode: false,
            normalize_newlines: true,
            trim_trailing_whitespace: false,
            sanitize_control_chars: true,
            remove_by_regex: false,
            regex: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessRegex {
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "quack-ocr.log".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Debug {
    pub keep_python_stderr: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_python_stderr: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub pin_scripts_dir: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.default_profile, Profile::Standard);
        assert_eq!(cfg.docling.ocr.langs, vec!["en".to_string()]);
        assert_eq!(cfg.docling.accelerator.num_threads, 4);
    }

    #[test]
    fn shutdown_timeout_zero_means_unbounded() {
        let mut cfg = Config::default();
        assert_eq!(cfg.server.shutdown_timeout(), Some(Duration::from_secs(30)));
        cfg.server.shutdown_timeout_seconds = 0;
        assert_eq!(cfg.server.shutdown_timeout(), None);
    }

    #[test]
    fn port_override() {
        let mut cfg = Config::default();
        cfg.apply_port("9191").unwrap();
        assert_eq!(cfg.server.port, 9191);
        cfg.apply_port("  ").unwrap();
        assert_eq!(cfg.server.port, 9191);
        assert!(cfg.apply_port("http").is_err());
    }

    #[test]
    fn ocr_flag_selects_profile() {
        let cfg = Config::default();
        let std_opts = cfg.convert_options(None);
        assert!(!std_opts.do_ocr);

        let ocr_opts = cfg.convert_options(Some(true));
        assert_eq!(ocr_opts.profile, Profile::Ocr);
        assert!(ocr_opts.do_ocr);
        assert!(ocr_opts.do_table_structure);
        assert!(ocr_opts.do_cell_matching);
        assert_eq!(ocr_opts.ocr.engine, "tesseract_cli");
        assert_eq!(ocr_opts.accelerator.device, "auto");
    }

    #[test]
    fn ocr_default_profile_can_be_disabled_per_request() {
        let mut cfg = Config::default();
        cfg.server.default_profile = Profile::Ocr;
        assert!(cfg.convert_options(None).do_ocr);
        assert!(!cfg.convert_options(Some(false)).do_ocr);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 3000
            max_body_bytes = 1024
            default_profile = "ocr"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.addr().to_string(), "127.0.0.1:3000");
        assert_eq!(cfg.server.default_profile, Profile::Ocr);
        assert_eq!(cfg.paths.scripts_dir, "scripts");
    }
}
