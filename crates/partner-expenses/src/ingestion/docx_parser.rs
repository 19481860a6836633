//! Word document expense parser

use crate::error::{Error, Result};

use super::parser::{extract_records, ExpenseParser, ParsedFile, RawDataset};

/// Parser slot for `.docx` expense documents.
///
/// Word documents are recognized by the dispatcher but not read yet, so
/// loading fails with [`Error::UnsupportedFormat`] instead of producing an
/// empty result that would look like a file with no expenses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxParser;

impl DocxParser {
    pub fn new() -> Self {
        Self
    }
}

impl ExpenseParser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn load_data(&self, path: &str, file_name: &str, _data: &[u8]) -> Result<RawDataset> {
        tracing::debug!("[{}] refusing Word document at {}", file_name, path);
        Err(Error::UnsupportedFormat(format!(
            "Word expense documents are not supported yet ({})",
            file_name
        )))
    }

    fn extract_expense(&self, dataset: RawDataset) -> Result<ParsedFile> {
        extract_records(dataset)
    }
}
