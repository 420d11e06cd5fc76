//! `RfqStore` trait: single async interface for RFQ persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::Item;

/// Lifecycle of an RFQ record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfqStatus {
    Draft,
    Processing,
    /// Items extracted and ready for sourcing. New intake records start here.
    Ready,
    Sent,
    Completed,
}

impl RfqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Sent => "sent",
            Self::Completed => "completed",
        }
    }
}

impl std::str::FromStr for RfqStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "sent" => Ok(Self::Sent),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown RFQ status '{other}'")),
        }
    }
}

/// Parameters for a new RFQ. The number is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRfq {
    pub client_name: String,
    pub notes: Option<String>,
    pub prefix: String,
    /// `None` means the current UTC year at write time.
    pub year: Option<i32>,
}

/// A persisted RFQ header.
#[derive(Debug, Clone)]
pub struct StoredRfq {
    pub id: Uuid,
    pub rfq_number: String,
    pub client_name: String,
    pub status: RfqStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted line item.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: Uuid,
    pub rfq_id: Uuid,
    /// Zero-based position in extraction order.
    pub position: i64,
    pub name: String,
    pub quantity: Option<u32>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Backend-agnostic RFQ store.
#[async_trait]
pub trait RfqStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Create an RFQ header and all of its items atomically.
    ///
    /// The RFQ number is `{prefix}-{year}-{seq:05}`, one past the highest
    /// existing number for that prefix and year.
    async fn create_rfq_with_items(
        &self,
        rfq: &NewRfq,
        items: &[Item],
    ) -> Result<StoredRfq, DatabaseError>;

    async fn get_rfq(&self, id: Uuid) -> Result<Option<StoredRfq>, DatabaseError>;

    /// Most recent first.
    async fn list_rfqs(&self, limit: usize) -> Result<Vec<StoredRfq>, DatabaseError>;

    /// Items in extraction order.
    async fn list_items(&self, rfq_id: Uuid) -> Result<Vec<StoredItem>, DatabaseError>;
}
