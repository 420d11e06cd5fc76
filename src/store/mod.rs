//! Persistence layer: libSQL-backed storage for RFQs and their items.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{NewRfq, RfqStatus, RfqStore, StoredItem, StoredRfq};
