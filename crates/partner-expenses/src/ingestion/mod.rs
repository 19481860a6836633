//! Expense file ingestion: parsers, dispatch and path handling

mod csv_parser;
mod dispatcher;
mod docx_parser;
mod excel_parser;
pub mod parser;
mod path;

pub use csv_parser::{CsvOptions, CsvParser};
pub use dispatcher::Dispatcher;
pub use docx_parser::DocxParser;
pub use excel_parser::{ExcelOptions, ExcelParser, SheetSelector};
pub use parser::{ExpenseParser, ParsedFile, RawDataset, RawRow};
pub use path::{clean_name, object_key};
