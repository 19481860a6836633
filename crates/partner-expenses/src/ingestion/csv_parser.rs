//! Delimited-text expense parser

use crate::error::{Error, Result, RowParseError};

use super::parser::{extract_records, normalize_header, ExpenseParser, ParsedFile, RawDataset, RawRow};

/// CSV reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    /// Field delimiter (default: `,`)
    pub delimiter: u8,
    /// First row holds column names (default: true)
    pub has_headers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_headers: true,
        }
    }
}

/// Parser for `.csv` expense files
#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    options: CsvOptions,
}

impl CsvParser {
    pub fn new(options: CsvOptions) -> Self {
        Self { options }
    }
}

impl ExpenseParser for CsvParser {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn load_data(&self, path: &str, file_name: &str, data: &[u8]) -> Result<RawDataset> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.options.delimiter)
            .has_headers(self.options.has_headers)
            .flexible(true)
            .from_reader(data);

        let headers = if self.options.has_headers {
            let header_record = reader
                .byte_headers()
                .map_err(|e| Error::source_format(file_name, format!("unreadable header row: {}", e)))?;

            if header_record.iter().all(|h| h.is_empty()) {
                return Err(Error::source_format(file_name, "file is empty or has no header row"));
            }

            let names = header_record
                .iter()
                .map(|h| {
                    std::str::from_utf8(h)
                        .map(normalize_header)
                        .map_err(|_| Error::source_format(file_name, "header row is not valid UTF-8"))
                })
                .collect::<Result<Vec<_>>>()?;
            Some(names)
        } else {
            None
        };

        let mut rows = Vec::new();
        let mut load_errors = Vec::new();
        // Line of the previous record, for errors that carry no position
        let mut last_line = if self.options.has_headers { 1 } else { 0 };

        for result in reader.byte_records() {
            match result {
                Ok(record) => {
                    let row_number = record
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or(last_line + 1);
                    last_line = row_number;

                    let cells: std::result::Result<Vec<String>, _> = record
                        .iter()
                        .map(|field| std::str::from_utf8(field).map(str::to_string))
                        .collect();

                    match cells {
                        Ok(cells) => rows.push(RawRow { row_number, cells }),
                        Err(_) => load_errors.push(RowParseError::new(row_number, "row is not valid UTF-8")),
                    }
                }
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(Error::source_format(file_name, e.to_string()));
                }
                Err(e) => {
                    let row_number = e
                        .position()
                        .map(|p| p.line() as usize)
                        .unwrap_or(last_line + 1);
                    last_line = row_number;
                    load_errors.push(RowParseError::new(row_number, format!("malformed record: {}", e)));
                }
            }
        }

        tracing::debug!(
            "[{}] loaded {} CSV rows from {} ({} unreadable)",
            file_name,
            rows.len(),
            path,
            load_errors.len()
        );

        Ok(RawDataset {
            source_name: file_name.to_string(),
            headers,
            rows,
            load_errors,
        })
    }

    fn extract_expense(&self, dataset: RawDataset) -> Result<ParsedFile> {
        extract_records(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const HEADER: &str = "partner_id,expense_type,expense_amount,customer_user_id,customer_id\n";

    fn parse(options: CsvOptions, text: &str) -> Result<ParsedFile> {
        CsvParser::new(options).parse("partners/p1/march.csv", "march.csv", text.as_bytes())
    }

    #[test]
    fn test_parses_well_formed_rows_in_order() {
        let text = format!(
            "{HEADER}p1,travel,100.25,7,c1\np1,meals,12,,c2\np2,\"lodging, 2 nights\",\"1,200.00\",,c3\n"
        );
        let parsed = parse(CsvOptions::default(), &text).unwrap();

        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.records[0].expense_amount, Decimal::from_str("100.25").unwrap());
        assert_eq!(parsed.records[0].customer_user_id, Some(7));
        assert_eq!(parsed.records[0].row_number, 2);
        assert_eq!(parsed.records[2].expense_type, "lodging, 2 nights");
        assert_eq!(parsed.records[2].expense_amount, Decimal::from(1200));
        assert_eq!(parsed.records[2].row_number, 4);
    }

    #[test]
    fn test_bad_rows_do_not_abort_the_file() {
        let mut text = HEADER.to_string();
        let bad_rows = [3usize, 10, 57];
        for i in 1..=100usize {
            if bad_rows.contains(&i) {
                text.push_str(&format!("p{i},travel,not-a-number,,c{i}\n"));
            } else {
                text.push_str(&format!("p{i},travel,{i}.50,,c{i}\n"));
            }
        }

        let parsed = parse(CsvOptions::default(), &text).unwrap();

        assert_eq!(parsed.records.len(), 97);
        assert_eq!(parsed.errors.len(), 3);
        // header is line 1, so data row i is line i + 1
        let error_rows: Vec<_> = parsed.errors.iter().map(|e| e.row).collect();
        assert_eq!(error_rows, vec![4, 11, 58]);

        let expected: Vec<String> = (1..=100usize)
            .filter(|i| !bad_rows.contains(i))
            .map(|i| format!("p{i}"))
            .collect();
        let actual: Vec<String> = parsed.records.iter().map(|r| r.partner_id.clone()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_negative_amounts_are_row_errors() {
        let text = format!("{HEADER}p1,travel,$-5.00,,c1\np2,meals,\"$1,250.00\",,c2\np3,meals,€ -12,,c3\n");

        let parsed = parse(CsvOptions::default(), &text).unwrap();

        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].expense_amount, Decimal::from(1250));
        let error_rows: Vec<_> = parsed.errors.iter().map(|e| e.row).collect();
        assert_eq!(error_rows, vec![2, 4]);
        assert!(parsed.errors.iter().all(|e| e.reason.contains("negative")));
    }

    #[test]
    fn test_custom_delimiter_without_headers() {
        let options = CsvOptions {
            delimiter: b';',
            has_headers: false,
        };
        let parsed = parse(options, "p1;travel;5;;c1\np2;meals;6;3;c2\n").unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].row_number, 1);
        assert_eq!(parsed.records[1].customer_user_id, Some(3));
    }

    #[test]
    fn test_blank_rows_are_skipped() {
        let text = format!("{HEADER}p1,travel,5,,c1\n,,,,\n\np2,travel,6,,c2\n");
        let parsed = parse(CsvOptions::default(), &text).unwrap();

        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.skipped_rows, 1);
    }

    #[test]
    fn test_invalid_utf8_row_is_a_row_error() {
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(b"p1,travel,5,,c1\n");
        bytes.extend_from_slice(b"p2,trav\xff\xfeel,5,,c2\n");
        bytes.extend_from_slice(b"p3,travel,5,,c3\n");

        let parsed = CsvParser::default().parse("k", "bad.csv", &bytes).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].row, 3);
    }

    #[test]
    fn test_empty_file_is_a_format_error() {
        assert!(matches!(
            parse(CsvOptions::default(), ""),
            Err(Error::SourceFormat { .. })
        ));
    }

    #[test]
    fn test_missing_columns_is_a_format_error() {
        let err = parse(CsvOptions::default(), "name,total\nx,1\n").unwrap_err();
        assert!(matches!(err, Error::SourceFormat { .. }));
    }
}
