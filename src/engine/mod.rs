pub mod python;
pub mod types;

use anyhow::Result;

pub use types::{Accelerator, ConvertIn, ConvertOptions, ConvertOut, DocDiag, OcrSettings, Profile};

/// The conversion backend. Calls block until the document is converted.
pub trait Engine: Send + Sync {
    fn doctor(&self) -> Result<DocDiag>;
    fn convert(&self, req: &ConvertIn) -> Result<ConvertOut>;
}
