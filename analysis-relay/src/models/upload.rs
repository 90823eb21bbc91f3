/// Content type of the spreadsheet the analysis server produces.
pub const SPREADSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const RESULT_PREFIX: &str = "Result_";
const RESULT_EXTENSION: &str = ".xlsx";

/// A file received from the browser, fully buffered.
#[derive(Debug, Clone)]
pub struct InboundFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl InboundFile {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Successful upstream payload, relayed byte for byte.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub source_filename: String,
    pub bytes: Vec<u8>,
}

impl AnalysisResult {
    /// `Result_{original}.xlsx`. The original extension is kept, so
    /// `scenes.pdf` becomes `Result_scenes.pdf.xlsx`.
    pub fn download_filename(&self) -> String {
        format!("{}{}{}", RESULT_PREFIX, self.source_filename, RESULT_EXTENSION)
    }

    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.download_filename())
    }
}
