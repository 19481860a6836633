//! Expense records as parsed from partner files and as stored

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One parsed expense line item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    /// Partner the expense belongs to
    pub partner_id: String,
    /// Expense category
    pub expense_type: String,
    /// Amount, always non-negative
    pub expense_amount: Decimal,
    /// Optional reference to a customer user
    pub customer_user_id: Option<i64>,
    /// Customer identifier
    pub customer_id: String,
    /// 1-based row in the source file (header row included)
    pub row_number: usize,
}

/// An expense as read back from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredExpense {
    pub id: i64,
    pub partner_id: String,
    pub expense_type: String,
    pub expense_amount: Decimal,
    pub customer_user_id: Option<i64>,
    pub customer_id: String,
    /// Object key of the file the row came from
    pub source_key: String,
    /// Content hash of that file
    pub source_hash: String,
    pub row_number: usize,
    /// Uniqueness key: one stored row per (file content, row)
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Customer user referenced by expenses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerUser {
    pub user_id: i64,
    pub customer_id: String,
}
