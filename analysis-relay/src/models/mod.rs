pub mod upload;

pub use upload::{AnalysisResult, InboundFile, SPREADSHEET_CONTENT_TYPE};
