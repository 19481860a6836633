//! SQLite expense store
//!
//! Holds partner expenses, the customer users they reference, and a ledger of
//! processing runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::expense_store::{ExpenseStore, SaveOutcome, SourceInfo};
use crate::types::{hash_bytes, CustomerUser, ExpenseRecord, Outcome, ProcessingSummary, StoredExpense};

/// SQLite-based expense database
#[derive(Clone)]
pub struct ExpenseDb {
    conn: Arc<Mutex<Connection>>,
}

impl ExpenseDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=5000;
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS customer_users (
                user_id INTEGER PRIMARY KEY,
                customer_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS partner_expenses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                partner_id TEXT NOT NULL,
                expense_type TEXT NOT NULL,
                -- Decimal text, never a float
                expense_amount TEXT NOT NULL,
                customer_user_id INTEGER
                    REFERENCES customer_users(user_id) ON UPDATE CASCADE ON DELETE SET NULL,
                customer_id TEXT NOT NULL,
                source_key TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                row_number INTEGER NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                -- Delivery that wrote the row
                delivery_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_partner_expenses_partner ON partner_expenses(partner_id);
            CREATE INDEX IF NOT EXISTS idx_partner_expenses_source ON partner_expenses(source_key);
            CREATE INDEX IF NOT EXISTS idx_partner_expenses_user ON partner_expenses(customer_user_id);

            -- One row per processed delivery
            CREATE TABLE IF NOT EXISTS ingest_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                receive_count INTEGER NOT NULL,
                source_key TEXT NOT NULL,
                file_type TEXT NOT NULL,
                records_parsed INTEGER NOT NULL,
                records_saved INTEGER NOT NULL,
                duplicates_skipped INTEGER NOT NULL,
                row_errors INTEGER NOT NULL,
                store_failures INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                error TEXT,
                finished_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ingest_runs_message ON ingest_runs(message_id);
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Expense database migrations complete");
        Ok(())
    }

    // ==================== Customer Users ====================

    /// Insert or update a customer user
    pub fn upsert_customer_user(&self, user: &CustomerUser) -> Result<()> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO customer_users (user_id, customer_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                customer_id = excluded.customer_id,
                updated_at = excluded.updated_at
            "#,
            params![user.user_id, user.customer_id, now],
        )
        .map_err(|e| Error::store_write(format!("Failed to upsert customer user: {}", e)))?;

        Ok(())
    }

    pub fn get_customer_user(&self, user_id: i64) -> Result<Option<CustomerUser>> {
        let conn = self.conn.lock();

        conn.query_row(
            "SELECT user_id, customer_id FROM customer_users WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(CustomerUser {
                    user_id: row.get(0)?,
                    customer_id: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Internal(format!("Failed to get customer user: {}", e)))
    }

    // ==================== Expenses ====================

    /// Insert one file's records in a single transaction.
    ///
    /// Rows already stored under the same dedup key count as duplicates,
    /// unless the same delivery wrote them: an attempt that timed out in the
    /// caller can still commit, and its retry must report those rows as saved.
    /// A record that violates a constraint (unknown customer user) is reported
    /// in `failures` and the rest are kept. Any other database error rolls the
    /// batch back and fails with `StoreWrite`.
    pub fn insert_expenses(&self, source: &SourceInfo, records: &[ExpenseRecord]) -> Result<SaveOutcome> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::store_write(format!("Failed to begin transaction: {}", e)))?;

        let mut outcome = SaveOutcome::default();
        let now = Utc::now().to_rfc3339();

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO partner_expenses (
                        partner_id, expense_type, expense_amount, customer_user_id, customer_id,
                        source_key, source_hash, row_number, dedup_key, delivery_id, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                    ON CONFLICT(dedup_key) DO NOTHING
                    "#,
                )
                .map_err(|e| Error::store_write(format!("Failed to prepare insert: {}", e)))?;
            let mut writer = tx
                .prepare("SELECT delivery_id FROM partner_expenses WHERE dedup_key = ?1")
                .map_err(|e| Error::store_write(format!("Failed to prepare lookup: {}", e)))?;

            for record in records {
                let key = dedup_key(&source.content_hash, record.row_number);
                let inserted = stmt.execute(params![
                    record.partner_id,
                    record.expense_type,
                    record.expense_amount.to_string(),
                    record.customer_user_id,
                    record.customer_id,
                    source.key,
                    source.content_hash,
                    record.row_number as i64,
                    key,
                    source.delivery_id,
                    now,
                ]);

                match inserted {
                    Ok(0) => {
                        let written_by: String = writer.query_row(params![key], |row| row.get(0)).map_err(|e| {
                            Error::store_write(format!("Failed to look up row {}: {}", record.row_number, e))
                        })?;
                        if written_by == source.delivery_id {
                            outcome.inserted += 1;
                        } else {
                            outcome.duplicates += 1;
                        }
                    }
                    Ok(_) => outcome.inserted += 1,
                    Err(rusqlite::Error::SqliteFailure(err, msg)) if err.code == ErrorCode::ConstraintViolation => {
                        let reason = msg.unwrap_or_else(|| err.to_string());
                        tracing::warn!(
                            "[{}] row {} rejected by the store: {}",
                            source.name,
                            record.row_number,
                            reason
                        );
                        outcome.failures.push((record.clone(), reason));
                    }
                    Err(e) => {
                        return Err(Error::store_write(format!(
                            "Failed to insert row {} of {}: {}",
                            record.row_number, source.key, e
                        )));
                    }
                }
            }
        }

        tx.commit()
            .map_err(|e| Error::store_write(format!("Failed to commit expenses: {}", e)))?;

        Ok(outcome)
    }

    /// All expenses in insertion order
    pub fn list_expenses(&self) -> Result<Vec<StoredExpense>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM partner_expenses ORDER BY id", EXPENSE_COLUMNS))
            .map_err(|e| Error::Internal(format!("Failed to prepare query: {}", e)))?;

        let expenses = stmt
            .query_map([], row_to_stored_expense)
            .map_err(|e| Error::Internal(format!("Failed to list expenses: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Internal(format!("Failed to read expense: {}", e)))?;

        Ok(expenses)
    }

    /// Expenses from one object key, in source row order
    pub fn list_expenses_by_source(&self, source_key: &str) -> Result<Vec<StoredExpense>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM partner_expenses WHERE source_key = ?1 ORDER BY row_number",
                EXPENSE_COLUMNS
            ))
            .map_err(|e| Error::Internal(format!("Failed to prepare query: {}", e)))?;

        let expenses = stmt
            .query_map(params![source_key], row_to_stored_expense)
            .map_err(|e| Error::Internal(format!("Failed to list expenses: {}", e)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Internal(format!("Failed to read expense: {}", e)))?;

        Ok(expenses)
    }

    pub fn count_expenses(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM partner_expenses", [], |row| row.get(0))
            .map_err(|e| Error::Internal(format!("Failed to count expenses: {}", e)))?;
        Ok(count as usize)
    }

    // ==================== Run Ledger ====================

    pub fn insert_run(&self, summary: &ProcessingSummary) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO ingest_runs (
                message_id, receive_count, source_key, file_type, records_parsed, records_saved,
                duplicates_skipped, row_errors, store_failures, outcome, duration_ms, error, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                summary.message_id,
                summary.receive_count,
                summary.source_key,
                summary.file_type,
                summary.records_parsed as i64,
                summary.records_saved as i64,
                summary.duplicates_skipped as i64,
                summary.row_errors as i64,
                summary.store_failures as i64,
                summary.outcome.as_str(),
                summary.duration_ms as i64,
                summary.error,
                summary.finished_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::store_write(format!("Failed to record run: {}", e)))?;

        Ok(())
    }

    /// Most recent runs first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ProcessingSummary>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                r#"
                SELECT message_id, receive_count, source_key, file_type, records_parsed, records_saved,
                       duplicates_skipped, row_errors, store_failures, outcome, duration_ms, error, finished_at
                FROM ingest_runs ORDER BY id DESC LIMIT ?1
                "#,
            )
            .map_err(|e| Error::Internal(format!("Failed to prepare query: {}", e)))?;

        let runs = stmt
            .query_map(params![limit as i64], row_to_summary)
            .map_err(|e| Error::Internal(format!("Failed to list runs: {}", e)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(runs)
    }
}

#[async_trait]
impl ExpenseStore for ExpenseDb {
    async fn save_batch(&self, source: &SourceInfo, records: &[ExpenseRecord]) -> Result<SaveOutcome> {
        let db = self.clone();
        let source = source.clone();
        let records = records.to_vec();
        tokio::task::spawn_blocking(move || db.insert_expenses(&source, &records))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    async fn record_run(&self, summary: &ProcessingSummary) -> Result<()> {
        let db = self.clone();
        let summary = summary.clone();
        tokio::task::spawn_blocking(move || db.insert_run(&summary))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// One stored row per (file content, source row)
pub fn dedup_key(content_hash: &str, row_number: usize) -> String {
    hash_bytes(format!("{}:{}", content_hash, row_number).as_bytes())
}

const EXPENSE_COLUMNS: &str = "id, partner_id, expense_type, expense_amount, customer_user_id, customer_id, \
     source_key, source_hash, row_number, dedup_key, created_at, updated_at";

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_stored_expense(row: &rusqlite::Row) -> rusqlite::Result<StoredExpense> {
    let amount_str: String = row.get(3)?;
    let row_number: i64 = row.get(8)?;
    let created_at_str: String = row.get(10)?;
    let updated_at_str: String = row.get(11)?;

    let expense_amount = Decimal::from_str(&amount_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(StoredExpense {
        id: row.get(0)?,
        partner_id: row.get(1)?,
        expense_type: row.get(2)?,
        expense_amount,
        customer_user_id: row.get(4)?,
        customer_id: row.get(5)?,
        source_key: row.get(6)?,
        source_hash: row.get(7)?,
        row_number: row_number as usize,
        dedup_key: row.get(9)?,
        created_at: parse_timestamp(&created_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<ProcessingSummary> {
    let outcome_str: String = row.get(9)?;
    let finished_at_str: String = row.get(12)?;
    let count = |idx: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(idx)? as usize) };

    Ok(ProcessingSummary {
        message_id: row.get(0)?,
        receive_count: row.get(1)?,
        source_key: row.get(2)?,
        file_type: row.get(3)?,
        records_parsed: count(4)?,
        records_saved: count(5)?,
        duplicates_skipped: count(6)?,
        row_errors: count(7)?,
        store_failures: count(8)?,
        outcome: Outcome::parse(&outcome_str).unwrap_or(Outcome::Retrying),
        duration_ms: row.get::<_, i64>(10)? as u64,
        error: row.get(11)?,
        finished_at: parse_timestamp(&finished_at_str),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::Dispatcher;
    use crate::types::FileReference;

    fn source(hash: &str) -> SourceInfo {
        delivered(hash, "m1:1")
    }

    fn delivered(hash: &str, delivery_id: &str) -> SourceInfo {
        SourceInfo {
            key: "partners/p1/march.csv".to_string(),
            name: "march.csv".to_string(),
            content_hash: hash.to_string(),
            file_type: "csv".to_string(),
            delivery_id: delivery_id.to_string(),
        }
    }

    fn record(row: usize, amount: &str, user: Option<i64>) -> ExpenseRecord {
        ExpenseRecord {
            partner_id: "p1".to_string(),
            expense_type: "travel".to_string(),
            expense_amount: Decimal::from_str(amount).unwrap(),
            customer_user_id: user,
            customer_id: "c1".to_string(),
            row_number: row,
        }
    }

    #[test]
    fn test_round_trip_keeps_amounts() {
        let db = ExpenseDb::in_memory().unwrap();
        let records: Vec<_> = (0..50)
            .map(|i| record(i + 2, &format!("{}.{:02}", i * 7, i % 100), None))
            .collect();

        let outcome = db.insert_expenses(&source("h1"), &records).unwrap();
        assert_eq!(outcome.inserted, 50);
        assert_eq!(outcome.duplicates, 0);
        assert!(!outcome.is_partial_failure());

        let stored = db.list_expenses_by_source("partners/p1/march.csv").unwrap();
        assert_eq!(stored.len(), 50);
        for (original, saved) in records.iter().zip(&stored) {
            assert_eq!(saved.expense_amount, original.expense_amount);
            assert_eq!(saved.row_number, original.row_number);
            assert_eq!(saved.source_hash, "h1");
        }
    }

    #[test]
    fn test_parsed_csv_round_trip_keeps_amounts() {
        let mut text = String::from("partner_id,expense_type,expense_amount,customer_user_id,customer_id\n");
        let amounts: Vec<String> = (1..=40).map(|i| format!("{}.{:02}", i * 13, (i * 7) % 100)).collect();
        for (i, amount) in amounts.iter().enumerate() {
            text.push_str(&format!("p{i},travel,\"${amount}\",,c{i}\n"));
        }

        let file_ref = FileReference::new("march.csv", "partners/p1/march.csv", text.into_bytes());
        let parsed = Dispatcher::default().dispatch("csv", &file_ref).unwrap();
        assert!(parsed.errors.is_empty());

        let db = ExpenseDb::in_memory().unwrap();
        let outcome = db
            .insert_expenses(&source(&file_ref.content_hash), &parsed.records)
            .unwrap();
        assert_eq!(outcome.inserted, 40);

        let stored = db.list_expenses_by_source("partners/p1/march.csv").unwrap();
        let saved: Vec<Decimal> = stored.iter().map(|e| e.expense_amount).collect();
        let expected: Vec<Decimal> = amounts.iter().map(|a| Decimal::from_str(a).unwrap()).collect();
        assert_eq!(saved, expected);
        assert!(stored.iter().all(|e| e.source_hash == file_ref.content_hash));
    }

    #[test]
    fn test_same_file_twice_is_stored_once() {
        let db = ExpenseDb::in_memory().unwrap();
        let records = vec![record(2, "10", None), record(3, "20", None)];

        db.insert_expenses(&source("h1"), &records).unwrap();
        let again = db.insert_expenses(&delivered("h1", "m1:2"), &records).unwrap();

        assert_eq!(again.inserted, 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(db.count_expenses().unwrap(), 2);

        // Different content under the same key is a different file
        let changed = db.insert_expenses(&source("h2"), &records).unwrap();
        assert_eq!(changed.inserted, 2);
        assert_eq!(db.count_expenses().unwrap(), 4);
    }

    #[test]
    fn test_rewrite_by_the_same_delivery_counts_as_saved() {
        let db = ExpenseDb::in_memory().unwrap();
        let records = vec![record(2, "10", None), record(3, "20", None)];

        // First attempt committed, then its caller gave up on it
        db.insert_expenses(&delivered("h1", "m1:1"), &records[..1]).unwrap();

        let retry = db.insert_expenses(&delivered("h1", "m1:1"), &records).unwrap();
        assert_eq!(retry.inserted, 2);
        assert_eq!(retry.duplicates, 0);

        let other = db.insert_expenses(&delivered("h1", "m2:1"), &records).unwrap();
        assert_eq!(other.inserted, 0);
        assert_eq!(other.duplicates, 2);
        assert_eq!(db.count_expenses().unwrap(), 2);
    }

    #[test]
    fn test_unknown_customer_user_is_a_record_failure() {
        let db = ExpenseDb::in_memory().unwrap();
        db.upsert_customer_user(&CustomerUser {
            user_id: 7,
            customer_id: "c1".to_string(),
        })
        .unwrap();

        let records = vec![
            record(2, "1", Some(7)),
            record(3, "2", Some(999)),
            record(4, "3", None),
        ];
        let outcome = db.insert_expenses(&source("h1"), &records).unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].0.row_number, 3);
        assert_eq!(db.count_expenses().unwrap(), 2);
    }

    #[test]
    fn test_customer_user_id_update_cascades() {
        let db = ExpenseDb::in_memory().unwrap();
        db.upsert_customer_user(&CustomerUser {
            user_id: 7,
            customer_id: "c1".to_string(),
        })
        .unwrap();
        db.insert_expenses(&source("h1"), &[record(2, "5", Some(7))]).unwrap();

        db.conn
            .lock()
            .execute("UPDATE customer_users SET user_id = 8 WHERE user_id = 7", [])
            .unwrap();

        let stored = db.list_expenses().unwrap();
        assert_eq!(stored[0].customer_user_id, Some(8));
        assert!(db.get_customer_user(7).unwrap().is_none());
    }

    #[test]
    fn test_run_ledger() {
        let db = ExpenseDb::in_memory().unwrap();

        let mut first = ProcessingSummary::new("m1", 1);
        first.outcome = Outcome::Retrying;
        first.error = Some("store_write: database is locked".to_string());
        db.insert_run(&first).unwrap();

        let mut second = ProcessingSummary::new("m1", 2);
        second.records_saved = 3;
        db.insert_run(&second).unwrap();

        let runs = db.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].receive_count, 2);
        assert_eq!(runs[0].outcome, Outcome::Completed);
        assert_eq!(runs[1].outcome, Outcome::Retrying);
    }

    #[tokio::test]
    async fn test_store_trait_runs_off_the_async_thread() {
        let db = ExpenseDb::in_memory().unwrap();
        let store: Arc<dyn ExpenseStore> = Arc::new(db.clone());

        let outcome = store
            .save_batch(&source("h1"), &[record(2, "12.34", None)])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(db.count_expenses().unwrap(), 1);
    }
}
