//! Parser interface and the row coercion shared by tabular formats

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{Error, Result, RowParseError};
use crate::types::ExpenseRecord;

/// Capability contract every expense file parser satisfies.
///
/// Parsers are stateless apart from their options and are created per file.
pub trait ExpenseParser: Send + Sync {
    /// Parser name for logging
    fn name(&self) -> &'static str;

    /// Decode raw bytes into rows. `path` and `file_name` are used for error
    /// messages only; the bytes are already fetched.
    fn load_data(&self, path: &str, file_name: &str, data: &[u8]) -> Result<RawDataset>;

    /// Turn loaded rows into expense records, collecting per-row failures
    fn extract_expense(&self, dataset: RawDataset) -> Result<ParsedFile>;

    /// Load then extract
    fn parse(&self, path: &str, file_name: &str, data: &[u8]) -> Result<ParsedFile> {
        let dataset = self.load_data(path, file_name, data)?;
        self.extract_expense(dataset)
    }
}

/// One row of cells as text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based row number in the source (header row included)
    pub row_number: usize,
    pub cells: Vec<String>,
}

/// Rows loaded from a file, before coercion
#[derive(Debug, Clone, Default)]
pub struct RawDataset {
    /// File name, for messages
    pub source_name: String,
    /// Normalized header names, `None` for positional files
    pub headers: Option<Vec<String>>,
    pub rows: Vec<RawRow>,
    /// Rows the container itself could not decode (bad quoting, bad UTF-8)
    pub load_errors: Vec<RowParseError>,
}

/// Result of extraction: records in source order plus per-row failures
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub source_name: String,
    pub records: Vec<ExpenseRecord>,
    pub errors: Vec<RowParseError>,
    /// Blank rows (trailing rows, merged-cell filler) that were ignored
    pub skipped_rows: usize,
}

impl ParsedFile {
    /// Rows that were either parsed or rejected
    pub fn total_rows(&self) -> usize {
        self.records.len() + self.errors.len()
    }

    pub fn into_parts(self) -> (Vec<ExpenseRecord>, Vec<RowParseError>) {
        (self.records, self.errors)
    }
}

/// Normalize a header cell: trim, lowercase, spaces and dashes to underscores
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Positions of the expense fields within a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub partner_id: usize,
    pub expense_type: usize,
    pub expense_amount: usize,
    pub customer_user_id: Option<usize>,
    pub customer_id: usize,
}

impl ColumnMap {
    /// Column order used when a file has no header row
    pub const POSITIONAL: ColumnMap = ColumnMap {
        partner_id: 0,
        expense_type: 1,
        expense_amount: 2,
        customer_user_id: Some(3),
        customer_id: 4,
    };

    /// Resolve columns by header name, or positionally without headers
    pub fn resolve(headers: Option<&[String]>, source_name: &str) -> Result<Self> {
        let Some(headers) = headers else {
            return Ok(Self::POSITIONAL);
        };

        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.as_str()));

        let mut missing = Vec::new();
        let mut require = |field: &'static str, names: &[&str]| {
            let idx = find(names);
            if idx.is_none() {
                missing.push(field);
            }
            idx.unwrap_or(usize::MAX)
        };

        let partner_id = require("partner_id", &["partner_id", "partner"]);
        let expense_type = require("expense_type", &["expense_type", "type"]);
        let expense_amount = require("expense_amount", &["expense_amount", "amount"]);
        let customer_id = require("customer_id", &["customer_id"]);

        if !missing.is_empty() {
            return Err(Error::source_format(
                source_name,
                format!(
                    "header row is missing required column(s): {} (found: {})",
                    missing.join(", "),
                    headers.join(", ")
                ),
            ));
        }

        Ok(Self {
            partner_id,
            expense_type,
            expense_amount,
            customer_user_id: find(&["customer_user_id"]),
            customer_id,
        })
    }

    fn mapped(&self) -> impl Iterator<Item = usize> {
        [
            Some(self.partner_id),
            Some(self.expense_type),
            Some(self.expense_amount),
            self.customer_user_id,
            Some(self.customer_id),
        ]
        .into_iter()
        .flatten()
    }
}

/// Coerce every row of a dataset. Shared by the CSV and Excel parsers.
pub fn extract_records(dataset: RawDataset) -> Result<ParsedFile> {
    let columns = ColumnMap::resolve(dataset.headers.as_deref(), &dataset.source_name)?;

    let mut parsed = ParsedFile {
        source_name: dataset.source_name,
        records: Vec::with_capacity(dataset.rows.len()),
        errors: dataset.load_errors,
        skipped_rows: 0,
    };

    for row in &dataset.rows {
        match coerce_row(row, &columns) {
            Ok(Some(record)) => parsed.records.push(record),
            Ok(None) => parsed.skipped_rows += 1,
            Err(e) => parsed.errors.push(e),
        }
    }

    // Load errors were collected first; keep the report in file order
    parsed.errors.sort_by_key(|e| e.row);

    if !parsed.errors.is_empty() {
        tracing::debug!(
            "[{}] {} row(s) rejected, first: {}",
            parsed.source_name,
            parsed.errors.len(),
            parsed.errors[0]
        );
    }

    Ok(parsed)
}

/// Coerce one row. `Ok(None)` means the row is blank and should be skipped.
pub fn coerce_row(row: &RawRow, columns: &ColumnMap) -> std::result::Result<Option<ExpenseRecord>, RowParseError> {
    let cell = |idx: usize| row.cells.get(idx).map(|c| c.trim()).unwrap_or("");

    if columns.mapped().all(|idx| cell(idx).is_empty()) {
        return Ok(None);
    }

    let required = |field: &str, idx: usize| {
        let value = cell(idx);
        if value.is_empty() {
            Err(RowParseError::new(row.row_number, format!("{} is empty", field)))
        } else {
            Ok(value.to_string())
        }
    };

    let partner_id = required("partner_id", columns.partner_id)?;
    let expense_type = required("expense_type", columns.expense_type)?;
    let expense_amount = parse_amount(cell(columns.expense_amount))
        .map_err(|reason| RowParseError::new(row.row_number, reason))?;
    let customer_user_id = match columns.customer_user_id {
        Some(idx) => parse_customer_user_id(cell(idx))
            .map_err(|reason| RowParseError::new(row.row_number, reason))?,
        None => None,
    };
    let customer_id = required("customer_id", columns.customer_id)?;

    Ok(Some(ExpenseRecord {
        partner_id,
        expense_type,
        expense_amount,
        customer_user_id,
        customer_id,
        row_number: row.row_number,
    }))
}

/// Parse a monetary amount: optional currency sign, thousands separators allowed
pub fn parse_amount(raw: &str) -> std::result::Result<Decimal, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("expense_amount is empty".to_string());
    }

    // The sign may sit on either side of the currency symbol: "-$3", "$-3"
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let digits: String = unsigned
        .trim_start_matches(['$', '€', '£'])
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .collect();

    let amount = Decimal::from_str(&digits)
        .or_else(|_| Decimal::from_scientific(&digits))
        .map_err(|_| format!("expense_amount '{}' is not a number", trimmed))?;

    if (negative || amount.is_sign_negative()) && !amount.is_zero() {
        return Err(format!("expense_amount '{}' must not be negative", trimmed));
    }

    Ok(amount.normalize())
}

/// Parse an optional customer user reference
pub fn parse_customer_user_id(raw: &str) -> std::result::Result<Option<i64>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Ok(id) = trimmed.parse::<i64>() {
        return Ok(Some(id));
    }

    // Spreadsheets hand integers back as "42.0"
    Decimal::from_str(trimmed)
        .ok()
        .filter(|d| d.fract().is_zero())
        .and_then(|d| d.to_i64())
        .map(Some)
        .ok_or_else(|| format!("customer_user_id '{}' is not an integer", trimmed))
}
