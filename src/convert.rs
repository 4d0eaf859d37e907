use crate::{
    engine::{ConvertIn, ConvertOptions, Engine},
    error::{Error, Result},
    postprocess::Postprocessor,
    util::sha256_hex,
};
use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use tracing::{info, warn};

/// A uniquely named `.pdf` file holding one request's payload.
///
/// The file is removed when the guard is dropped, whichever way the
/// conversion ended. A file that is already gone is not an error.
#[derive(Debug)]
pub struct TempPdf {
    path: Option<TempPath>,
}

impl TempPdf {
    pub fn create(dir: &Path, bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("quack-ocr-")
            .suffix(".pdf")
            .tempfile_in(dir)
            .map_err(Error::TempFile)?;
        file.write_all(bytes).map_err(Error::TempFile)?;
        file.flush().map_err(Error::TempFile)?;
        // Close our handle; the engine reopens the file by path.
        Ok(Self {
            path: Some(file.into_temp_path()),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for TempPdf {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let shown = path.display().to_string();
        if let Err(err) = path.close() {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove temp file {shown}: {err}");
            }
        }
    }
}

/// Bytes in, markdown out.
pub struct Converter {
    engine: Arc<dyn Engine>,
    temp_dir: PathBuf,
    postprocess: Postprocessor,
}

impl Converter {
    pub fn new(engine: Arc<dyn Engine>, temp_dir: PathBuf, postprocess: Postprocessor) -> Self {
        Self {
            engine,
            temp_dir,
            postprocess,
        }
    }

    /// Blocks for the whole conversion; async callers go through `spawn_blocking`.
    pub fn convert_bytes(&self, bytes: &[u8], options: &ConvertOptions) -> Result<String> {
        if bytes.is_empty() {
            return Err(Error::EmptyPayload);
        }
        let started = Instant::now();
        let digest = sha256_hex(bytes);

        let pdf = TempPdf::create(&self.temp_dir, bytes)?;
        let req = ConvertIn {
            input_pdf: pdf.path().display().to_string(),
            options: options.clone(),
        };
        let out = self.engine.convert(&req).map_err(Error::Engine)?;
        drop(pdf);

        if !out.ok {
            let msg = out
                .error
                .unwrap_or_else(|| "docling conversion failed".to_string());
            return Err(Error::Rejected(msg));
        }
        for w in &out.warnings {
            warn!("docling warning: {w}");
        }

        info!(
            "converted bytes={} sha256={} profile={} markdown_chars={} elapsed_ms={}",
            bytes.len(),
            &digest[..12],
            options.profile.as_str(),
            out.markdown.len(),
            started.elapsed().as_millis()
        );
        Ok(self.postprocess.apply(out.markdown))
    }

    pub fn convert_file(&self, input: &Path, options: &ConvertOptions) -> anyhow::Result<String> {
        let bytes =
            std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        Ok(self.convert_bytes(&bytes, options)?)
    }
}
