//! Routes a fetched file to the parser for its type

use crate::config::ParsingConfig;
use crate::error::{Error, Result};
use crate::types::{FileReference, FileType};

use super::csv_parser::CsvParser;
use super::docx_parser::DocxParser;
use super::excel_parser::ExcelParser;
use super::parser::{ExpenseParser, ParsedFile};

/// Selects and runs a parser by declared file type.
///
/// Unknown types are rejected, never guessed. Performs no I/O: the
/// [`FileReference`] already carries the bytes.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    parsing: ParsingConfig,
}

impl Dispatcher {
    pub fn new(parsing: &ParsingConfig) -> Self {
        Self {
            parsing: parsing.clone(),
        }
    }

    /// Fresh parser for a file type
    pub fn parser_for(&self, file_type: &FileType) -> Result<Box<dyn ExpenseParser>> {
        match file_type {
            FileType::Csv => Ok(Box::new(CsvParser::new(self.parsing.csv_options()))),
            FileType::Xlsx | FileType::Xls => Ok(Box::new(ExcelParser::new(self.parsing.excel_options()))),
            FileType::Docx => Ok(Box::new(DocxParser::new())),
            FileType::Unsupported(ext) if ext.is_empty() => Err(Error::UnsupportedFormat(
                "file has no type or extension".to_string(),
            )),
            FileType::Unsupported(ext) => Err(Error::UnsupportedFormat(format!(
                "no parser for '{}' files",
                ext
            ))),
        }
    }

    /// Parse a file declared as `file_type` (an extension such as `csv` or `.XLSX`)
    pub fn dispatch(&self, file_type: &str, file_ref: &FileReference) -> Result<ParsedFile> {
        let file_type = FileType::from_extension(file_type);
        let parser = self.parser_for(&file_type)?;

        tracing::debug!(
            "[{}] dispatching {} bytes to the {} parser",
            file_ref.name,
            file_ref.size(),
            parser.name()
        );

        parser.parse(&file_ref.key, &file_ref.name, &file_ref.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_file() -> FileReference {
        FileReference::new(
            "march.csv",
            "partners/p1/march.csv",
            b"partner_id,expense_type,expense_amount,customer_user_id,customer_id\np1,travel,10,,c1\n".to_vec(),
        )
    }

    #[test]
    fn test_dispatch_csv() {
        let parsed = Dispatcher::default().dispatch("csv", &csv_file()).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.source_name, "march.csv");
    }

    #[test]
    fn test_declared_type_is_case_insensitive() {
        let parsed = Dispatcher::default().dispatch(".CSV", &csv_file()).unwrap();
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_pdf_is_unsupported() {
        let file = FileReference::new("march.pdf", "partners/p1/march.pdf", b"%PDF-1.7".to_vec());
        let err = Dispatcher::default().dispatch("pdf", &file).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_unknown_type_never_falls_back_to_csv() {
        // Perfectly good CSV bytes under an unknown type are still rejected
        let err = Dispatcher::default().dispatch("txt", &csv_file()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));

        let err = Dispatcher::default().dispatch("", &csv_file()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_docx_is_recognized_but_unsupported() {
        let dispatcher = Dispatcher::default();
        assert_eq!(dispatcher.parser_for(&FileType::Docx).unwrap().name(), "docx");

        let file = FileReference::new("march.docx", "k/march.docx", vec![0u8; 4]);
        assert!(matches!(
            dispatcher.dispatch("docx", &file),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parser_selection() {
        let dispatcher = Dispatcher::new(&ParsingConfig::default());
        assert_eq!(dispatcher.parser_for(&FileType::Xlsx).unwrap().name(), "excel");
        assert_eq!(dispatcher.parser_for(&FileType::Xls).unwrap().name(), "excel");
        assert_eq!(dispatcher.parser_for(&FileType::Csv).unwrap().name(), "csv");
    }
}
