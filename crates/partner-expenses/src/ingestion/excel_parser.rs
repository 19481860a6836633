//! Excel workbook expense parser (.xlsx and .xls)

use calamine::{Data, Reader};
use std::io::Cursor;

use crate::error::{Error, Result};

use super::parser::{extract_records, normalize_header, ExpenseParser, ParsedFile, RawDataset, RawRow};

/// Which worksheet to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelector {
    /// 0-based position in the workbook
    Index(usize),
    /// Sheet name, matched case-insensitively
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        Self::Index(0)
    }
}

/// Excel reader options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelOptions {
    pub sheet: SheetSelector,
    /// Sheet has a header row (default: true)
    pub has_headers: bool,
    /// 1-based header row within the used range (default: 1). Rows above it are ignored.
    pub header_row: usize,
}

impl Default for ExcelOptions {
    fn default() -> Self {
        Self {
            sheet: SheetSelector::default(),
            has_headers: true,
            header_row: 1,
        }
    }
}

/// Parser for Excel expense workbooks
#[derive(Debug, Clone, Default)]
pub struct ExcelParser {
    options: ExcelOptions,
}

impl ExcelParser {
    pub fn new(options: ExcelOptions) -> Self {
        Self { options }
    }

    fn sheet_name(&self, available: &[String], file_name: &str) -> Result<String> {
        let found = match &self.options.sheet {
            SheetSelector::Index(idx) => available.get(*idx).cloned(),
            SheetSelector::Name(name) => available
                .iter()
                .find(|s| s.eq_ignore_ascii_case(name))
                .cloned(),
        };

        found.ok_or_else(|| {
            Error::source_format(
                file_name,
                format!(
                    "worksheet {:?} not found (available: {})",
                    self.options.sheet,
                    available.join(", ")
                ),
            )
        })
    }
}

impl ExpenseParser for ExcelParser {
    fn name(&self) -> &'static str {
        "excel"
    }

    fn load_data(&self, path: &str, file_name: &str, data: &[u8]) -> Result<RawDataset> {
        let cursor = Cursor::new(data);
        let mut workbook = calamine::open_workbook_auto_from_rs(cursor)
            .map_err(|e| Error::source_format(file_name, format!("not a readable workbook: {}", e)))?;

        let sheet_names = workbook.sheet_names().to_vec();
        let sheet = self.sheet_name(&sheet_names, file_name)?;

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| Error::source_format(file_name, format!("worksheet '{}': {}", sheet, e)))?;

        // Row number of the first row in the used range
        let first_row = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);

        let mut rows = range.rows().enumerate().map(|(offset, cells)| RawRow {
            row_number: first_row + offset,
            cells: cells.iter().map(cell_to_string).collect(),
        });

        let headers = if self.options.has_headers {
            let header = rows
                .by_ref()
                .nth(self.options.header_row.saturating_sub(1))
                .filter(|row| row.cells.iter().any(|c| !c.is_empty()))
                .ok_or_else(|| {
                    Error::source_format(
                        file_name,
                        format!("worksheet '{}' has no header row {}", sheet, self.options.header_row),
                    )
                })?;
            Some(header.cells.iter().map(|c| normalize_header(c)).collect())
        } else {
            None
        };

        let rows: Vec<RawRow> = rows.collect();

        tracing::debug!(
            "[{}] loaded {} rows from worksheet '{}' of {}",
            file_name,
            rows.len(),
            sheet,
            path
        );

        Ok(RawDataset {
            source_name: file_name.to_string(),
            headers,
            rows,
            load_errors: Vec::new(),
        })
    }

    fn extract_expense(&self, dataset: RawDataset) -> Result<ParsedFile> {
        extract_records(dataset)
    }
}

/// Render a cell the way a user would read it
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => format_float(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("#{:?}", e),
    }
}

/// Whole floats print without a fraction so ids survive the round trip
fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_xlsxwriter::{Format, Workbook};
    use std::str::FromStr;

    const HEADERS: [&str; 5] = [
        "partner_id",
        "expense_type",
        "expense_amount",
        "customer_user_id",
        "customer_id",
    ];

    fn write_headers(sheet: &mut rust_xlsxwriter::Worksheet, row: u32) {
        for (col, name) in HEADERS.iter().enumerate() {
            sheet.write_string(row, col as u16, *name).unwrap();
        }
    }

    fn simple_workbook() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Expenses").unwrap();
        write_headers(sheet, 0);
        sheet.write_string(1, 0, "p1").unwrap();
        sheet.write_string(1, 1, "travel").unwrap();
        sheet.write_number(1, 2, 120.5).unwrap();
        sheet.write_number(1, 3, 42.0).unwrap();
        sheet.write_string(1, 4, "c1").unwrap();
        sheet.write_string(2, 0, "p2").unwrap();
        sheet.write_string(2, 1, "meals").unwrap();
        sheet.write_string(2, 2, "$18.00").unwrap();
        sheet.write_string(2, 4, "c2").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_reads_first_sheet() {
        let parsed = ExcelParser::default()
            .parse("k", "march.xlsx", &simple_workbook())
            .unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].expense_amount, Decimal::from_str("120.5").unwrap());
        assert_eq!(parsed.records[0].customer_user_id, Some(42));
        assert_eq!(parsed.records[0].row_number, 2);
        assert_eq!(parsed.records[1].expense_amount, Decimal::from(18));
        assert_eq!(parsed.records[1].customer_user_id, None);
    }

    #[test]
    fn test_selects_sheet_by_name() {
        let mut workbook = Workbook::new();
        let notes = workbook.add_worksheet();
        notes.set_name("Notes").unwrap();
        notes.write_string(0, 0, "nothing to see").unwrap();

        let sheet = workbook.add_worksheet();
        sheet.set_name("Expenses").unwrap();
        write_headers(sheet, 0);
        for (col, value) in ["p1", "travel", "3", "", "c1"].iter().enumerate() {
            sheet.write_string(1, col as u16, *value).unwrap();
        }
        let bytes = workbook.save_to_buffer().unwrap();

        let parser = ExcelParser::new(ExcelOptions {
            sheet: SheetSelector::Name("expenses".to_string()),
            ..Default::default()
        });
        let parsed = parser.parse("k", "book.xlsx", &bytes).unwrap();
        assert_eq!(parsed.records.len(), 1);

        // The default (first sheet) has no expense header
        assert!(matches!(
            ExcelParser::default().parse("k", "book.xlsx", &bytes),
            Err(Error::SourceFormat { .. })
        ));
    }

    #[test]
    fn test_missing_sheet_is_a_format_error() {
        let parser = ExcelParser::new(ExcelOptions {
            sheet: SheetSelector::Index(3),
            ..Default::default()
        });
        let err = parser.parse("k", "march.xlsx", &simple_workbook()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_partial_failure_and_blank_rows() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        write_headers(sheet, 0);

        let rows = [
            ["p1", "travel", "10", "", "c1"],
            ["p2", "travel", "ten", "", "c2"],
            ["p3", "travel", "30", "", "c3"],
            ["p4", "travel", "-4", "", "c4"],
            ["p5", "travel", "50", "", "c5"],
        ];
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet.write_string(r as u32 + 1, c as u16, *value).unwrap();
                }
            }
        }
        // merged note cell spanning a row with no expense data
        sheet.merge_range(6, 0, 6, 4, "", &Format::new()).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let parsed = ExcelParser::default().parse("k", "march.xlsx", &bytes).unwrap();

        let partners: Vec<_> = parsed.records.iter().map(|r| r.partner_id.as_str()).collect();
        assert_eq!(partners, vec!["p1", "p3", "p5"]);
        let error_rows: Vec<_> = parsed.errors.iter().map(|e| e.row).collect();
        assert_eq!(error_rows, vec![3, 5]);
    }

    #[test]
    fn test_header_row_offset() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Partner expense report, March").unwrap();
        write_headers(sheet, 1);
        for (col, value) in ["p1", "travel", "7.25", "", "c1"].iter().enumerate() {
            sheet.write_string(2, col as u16, *value).unwrap();
        }
        let bytes = workbook.save_to_buffer().unwrap();

        let parser = ExcelParser::new(ExcelOptions {
            header_row: 2,
            ..Default::default()
        });
        let parsed = parser.parse("k", "march.xlsx", &bytes).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].row_number, 3);
    }

    #[test]
    fn test_garbage_is_a_format_error() {
        let err = ExcelParser::default()
            .parse("k", "march.xlsx", b"definitely not a zip file")
            .unwrap_err();
        assert!(matches!(err, Error::SourceFormat { .. }));
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(42.0), "42");
        assert_eq!(format_float(12.75), "12.75");
    }
}
