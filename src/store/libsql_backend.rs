//! libSQL backend: async `RfqStore` implementation.
//!
//! Supports local file and in-memory databases. Writes that create an RFQ
//! run inside one transaction and are serialized through `write_lock`, so
//! two concurrent pipeline runs never observe the same next sequence
//! number or interleave partial records.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::Item;
use crate::store::migrations;
use crate::store::traits::{NewRfq, RfqStatus, RfqStore, StoredItem, StoredRfq};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_quantity(q: Option<u32>) -> libsql::Value {
    match q {
        Some(q) => libsql::Value::Integer(i64::from(q)),
        None => libsql::Value::Null,
    }
}

/// `{prefix}-{year}-{seq:05}`.
pub(crate) fn format_rfq_number(prefix: &str, year: i32, seq: u32) -> String {
    format!("{prefix}-{year}-{seq:05}")
}

/// Next sequence after `last` (an existing number with the same prefix/year).
///
/// An unparseable suffix restarts the sequence at 1.
pub(crate) fn next_sequence(last: Option<&str>) -> u32 {
    last.and_then(|n| n.rsplit('-').next())
        .and_then(|seq| seq.parse::<u32>().ok())
        .map(|seq| seq.saturating_add(1))
        .unwrap_or(1)
}

/// Map a libsql Row to a StoredRfq.
///
/// Column order matches RFQ_COLUMNS:
/// 0:id, 1:rfq_number, 2:client_name, 3:status, 4:notes, 5:created_at, 6:updated_at
fn row_to_rfq(row: &libsql::Row) -> Result<StoredRfq, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(StoredRfq {
        id: parse_uuid(&id_str),
        rfq_number: row.get(1)?,
        client_name: row.get(2)?,
        status: status_str.parse().unwrap_or(RfqStatus::Draft),
        notes: row.get::<Option<String>>(4)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

/// Column order matches ITEM_COLUMNS:
/// 0:id, 1:rfq_id, 2:position, 3:name, 4:quantity, 5:description, 6:created_at
fn row_to_item(row: &libsql::Row) -> Result<StoredItem, libsql::Error> {
    let id_str: String = row.get(0)?;
    let rfq_id_str: String = row.get(1)?;
    let quantity: Option<i64> = row.get(4)?;
    let created_str: String = row.get(6)?;

    Ok(StoredItem {
        id: parse_uuid(&id_str),
        rfq_id: parse_uuid(&rfq_id_str),
        position: row.get(2)?,
        name: row.get(3)?,
        quantity: quantity.and_then(|q| u32::try_from(q).ok()),
        description: row.get(5)?,
        created_at: parse_datetime(&created_str),
    })
}

/// Sequence lookup plus header and item inserts, all on the open transaction.
async fn insert_rfq(
    tx: &libsql::Transaction,
    rfq: &NewRfq,
    items: &[Item],
) -> Result<StoredRfq, DatabaseError> {
    let now = Utc::now();
    let year = rfq.year.unwrap_or_else(|| now.year());
    let pattern = format!("{}-{}-%", rfq.prefix, year);
    let mut rows = tx
        .query(
            "SELECT rfq_number FROM rfqs WHERE rfq_number LIKE ?1
             ORDER BY length(rfq_number) DESC, rfq_number DESC LIMIT 1",
            params![pattern],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read last RFQ number: {e}")))?;
    let last: Option<String> = match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to read last RFQ number: {e}")))?
    {
        Some(row) => Some(row.get(0).map_err(|e| DatabaseError::Query(e.to_string()))?),
        None => None,
    };
    drop(rows);

    let rfq_number = format_rfq_number(&rfq.prefix, year, next_sequence(last.as_deref()));
    let id = Uuid::new_v4();
    let now_str = now.to_rfc3339();

    tx.execute(
        "INSERT INTO rfqs (id, rfq_number, client_name, status, notes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            id.to_string(),
            rfq_number.clone(),
            rfq.client_name.clone(),
            RfqStatus::Ready.as_str(),
            opt_text(rfq.notes.as_deref()),
            now_str.clone(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("Failed to insert RFQ: {e}")))?;

    for (position, item) in items.iter().enumerate() {
        tx.execute(
            "INSERT INTO rfq_items (id, rfq_id, position, name, quantity, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.id.to_string(),
                id.to_string(),
                position as i64,
                item.name.clone(),
                opt_quantity(item.quantity),
                item.description.clone(),
                now_str.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("Failed to insert item '{}': {e}", item.name)))?;
    }

    Ok(StoredRfq {
        id,
        rfq_number,
        client_name: rfq.client_name.clone(),
        status: RfqStatus::Ready,
        notes: rfq.notes.clone(),
        created_at: now,
        updated_at: now,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const RFQ_COLUMNS: &str = "id, rfq_number, client_name, status, notes, created_at, updated_at";

const ITEM_COLUMNS: &str = "id, rfq_id, position, name, quantity, description, created_at";

#[async_trait]
impl RfqStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn create_rfq_with_items(
        &self,
        rfq: &NewRfq,
        items: &[Item],
    ) -> Result<StoredRfq, DatabaseError> {
        let _guard = self.write_lock.lock().await;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Transaction(format!("Failed to begin transaction: {e}")))?;

        match insert_rfq(&tx, rfq, items).await {
            Ok(stored) => {
                tx.commit().await.map_err(|e| {
                    DatabaseError::Transaction(format!("Failed to commit RFQ: {e}"))
                })?;
                debug!(rfq_number = %stored.rfq_number, items = items.len(), "RFQ stored");
                Ok(stored)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "RFQ rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn get_rfq(&self, id: Uuid) -> Result<Option<StoredRfq>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RFQ_COLUMNS} FROM rfqs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            Some(row) => Ok(Some(
                row_to_rfq(&row).map_err(|e| DatabaseError::Query(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_rfqs(&self, limit: usize) -> Result<Vec<StoredRfq>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RFQ_COLUMNS} FROM rfqs ORDER BY created_at DESC, rfq_number DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut rfqs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            rfqs.push(row_to_rfq(&row).map_err(|e| DatabaseError::Query(e.to_string()))?);
        }
        Ok(rfqs)
    }

    async fn list_items(&self, rfq_id: Uuid) -> Result<Vec<StoredItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM rfq_items WHERE rfq_id = ?1 ORDER BY position ASC"),
                params![rfq_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(e.to_string()))?
        {
            items.push(row_to_item(&row).map_err(|e| DatabaseError::Query(e.to_string()))?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn new_rfq(prefix: &str, year: i32) -> NewRfq {
        NewRfq {
            client_name: "Acme Procurement".into(),
            notes: Some("Auto-created from email: Valves".into()),
            prefix: prefix.into(),
            year: Some(year),
        }
    }

    #[test]
    fn rfq_number_format() {
        assert_eq!(format_rfq_number("INQ13QP", 2025, 7), "INQ13QP-2025-00007");
        assert_eq!(format_rfq_number("X", 2026, 123456), "X-2026-123456");
    }

    #[test]
    fn sequence_parsing() {
        assert_eq!(next_sequence(None), 1);
        assert_eq!(next_sequence(Some("INQ13QP-2025-00041")), 42);
        assert_eq!(next_sequence(Some("INQ13QP-2025-garbage")), 1);
    }

    #[tokio::test]
    async fn create_and_read_back() {
        let db = test_db().await;
        let items = vec![
            Item::new("Ball valve", Some(12), "DN50"),
            Item::new("Gate valve", None, ""),
        ];

        let stored = db
            .create_rfq_with_items(&new_rfq("INQ13QP", 2025), &items)
            .await
            .unwrap();
        assert_eq!(stored.rfq_number, "INQ13QP-2025-00001");
        assert_eq!(stored.status, RfqStatus::Ready);

        let fetched = db.get_rfq(stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.rfq_number, stored.rfq_number);
        assert_eq!(fetched.client_name, "Acme Procurement");
        assert_eq!(fetched.status, RfqStatus::Ready);

        let rows = db.list_items(stored.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, items[0].id);
        assert_eq!(rows[0].quantity, Some(12));
        assert_eq!(rows[1].name, "Gate valve");
        assert_eq!(rows[1].quantity, None);
    }

    #[tokio::test]
    async fn sequence_increments_per_prefix_and_year() {
        let db = test_db().await;
        let item = || vec![Item::new("Bolt", Some(1), "")];

        let a = db.create_rfq_with_items(&new_rfq("INQ13QP", 2025), &item()).await.unwrap();
        let b = db.create_rfq_with_items(&new_rfq("INQ13QP", 2025), &item()).await.unwrap();
        let c = db.create_rfq_with_items(&new_rfq("INQ13QP", 2026), &item()).await.unwrap();

        assert_eq!(a.rfq_number, "INQ13QP-2025-00001");
        assert_eq!(b.rfq_number, "INQ13QP-2025-00002");
        assert_eq!(c.rfq_number, "INQ13QP-2026-00001");
        assert_eq!(db.list_rfqs(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_numbers() {
        let db = Arc::new(test_db().await);
        let mut handles = Vec::new();
        for _ in 0..5 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.create_rfq_with_items(&new_rfq("INQ13QP", 2025), &[Item::new("Nut", Some(1), "")])
                    .await
                    .unwrap()
                    .rfq_number
            }));
        }

        let mut numbers = Vec::new();
        for h in handles {
            numbers.push(h.await.unwrap());
        }
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 5);
        assert_eq!(numbers.last().unwrap(), "INQ13QP-2025-00005");
    }

    #[tokio::test]
    async fn duplicate_item_id_rolls_back_whole_rfq() {
        let db = test_db().await;
        let item = Item::new("Washer", Some(100), "");
        let dup = vec![item.clone(), item];

        assert!(db.create_rfq_with_items(&new_rfq("INQ13QP", 2025), &dup).await.is_err());
        assert!(db.list_rfqs(10).await.unwrap().is_empty());

        let ok = db
            .create_rfq_with_items(&new_rfq("INQ13QP", 2025), &[Item::new("Washer", Some(1), "")])
            .await
            .unwrap();
        assert_eq!(ok.rfq_number, "INQ13QP-2025-00001");
    }

    #[tokio::test]
    async fn unpinned_year_uses_current_utc_year() {
        let db = test_db().await;
        let rfq = NewRfq {
            year: None,
            ..new_rfq("INQ13QP", 0)
        };

        let stored = db
            .create_rfq_with_items(&rfq, &[Item::new("Flange", Some(2), "")])
            .await
            .unwrap();
        let year = Utc::now().year();
        assert_eq!(stored.rfq_number, format!("INQ13QP-{year}-00001"));
    }

    #[tokio::test]
    async fn missing_rfq_is_none() {
        let db = test_db().await;
        assert!(db.get_rfq(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rfq.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.create_rfq_with_items(&new_rfq("T", 2025), &[Item::new("Pipe", Some(3), "")])
            .await
            .unwrap();
        assert!(path.exists());
    }
}
