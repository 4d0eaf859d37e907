use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocDiag {
    pub python_exe: String,
    pub python_version: String,
    pub docling_version: Option<String>,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Which Docling pipeline a conversion runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Docling defaults, text layer only.
    Standard,
    /// OCR and table structure with cell matching.
    Ocr,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Standard => "standard",
            Profile::Ocr => "ocr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSettings {
    pub engine: String,
    pub langs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accelerator {
    pub num_threads: u32,
    pub device: String,
}

/// Pipeline settings for a single conversion, passed explicitly to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertOptions {
    pub profile: Profile,
    pub do_ocr: bool,
    pub do_table_structure: bool,
    pub do_cell_matching: bool,
    pub ocr: OcrSettings,
    pub accelerator: Accelerator,
}

impl ConvertOptions {
    /// Docling's default pipeline. The runner ignores the remaining fields for this profile.
    pub fn standard() -> Self {
        Self {
            profile: Profile::Standard,
            do_ocr: false,
            do_table_structure: true,
            do_cell_matching: true,
            ocr: OcrSettings {
                engine: String::new(),
                langs: Vec::new(),
            },
            accelerator: Accelerator {
                num_threads: 4,
                device: "auto".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertIn {
    pub input_pdf: String,
    pub options: ConvertOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertOut {
    pub ok: bool,
    pub markdown: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}
