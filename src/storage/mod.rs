//! Persistence boundary.
//!
//! Confirmed weighings leave the process through a [`RecordStore`], a
//! table-oriented CRUD interface with row-change notifications. The hosted
//! database of a deployment sits behind it; [`MemoryStore`] is the in-process
//! implementation used by the CLI and tests. [`CsvBackup`] keeps a local copy
//! of every saved weighing.

use crate::error::ScaleResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

#[cfg(feature = "storage_csv")]
pub mod csv_backup;
pub mod memory;
pub mod sack;

#[cfg(feature = "storage_csv")]
pub use csv_backup::CsvBackup;
pub use memory::MemoryStore;
pub use sack::SackWeighing;

/// Table receiving confirmed sack weighings.
pub const SACOS_TABLE: &str = "sacos";

/// Column holding the store-assigned row id.
pub const ID_COLUMN: &str = "id";

/// A stored row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Equality filter for [`RecordStore::query`]. Every condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// `(column, value)` pairs compared with `==`
    pub equals: Vec<(String, Value)>,
    /// Maximum number of rows returned
    pub limit: Option<usize>,
}

impl Filter {
    /// Filter matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((column.into(), value.into()));
        self
    }

    /// Cap the number of rows returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` satisfies every condition.
    pub fn matches(&self, row: &Row) -> bool {
        self.equals
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Notification published after a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    /// A row was inserted
    Inserted {
        /// Table name
        table: String,
        /// The row as stored, including its id
        row: Row,
    },
    /// A row was patched
    Updated {
        /// Table name
        table: String,
        /// The row after the patch
        row: Row,
    },
    /// A row was removed
    Deleted {
        /// Table name
        table: String,
        /// Id of the removed row
        id: String,
    },
}

/// Table-oriented record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a JSON object and return it with its assigned id.
    async fn insert(&self, table: &str, record: Value) -> ScaleResult<Row>;

    /// Rows of `table` matching `filter`, in insertion order.
    async fn query(&self, table: &str, filter: &Filter) -> ScaleResult<Vec<Row>>;

    /// Merge the fields of `patch` into the row with `id`.
    async fn update(&self, table: &str, id: &str, patch: Value) -> ScaleResult<Row>;

    /// Remove the row with `id`.
    async fn delete(&self, table: &str, id: &str) -> ScaleResult<()>;

    /// Receive every subsequent change.
    fn subscribe(&self) -> broadcast::Receiver<RowChange>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_all_conditions() {
        let Value::Object(row) = json!({"fabrica_id": "F-1", "estado": "OK"}) else {
            unreachable!()
        };
        assert!(Filter::all().matches(&row));
        assert!(Filter::all().eq("fabrica_id", "F-1").matches(&row));
        assert!(!Filter::all()
            .eq("fabrica_id", "F-1")
            .eq("estado", "FUERA_RANGO")
            .matches(&row));
        assert!(!Filter::all().eq("missing", 1).matches(&row));
    }
}
