//! In-process record store.

use super::{Filter, RecordStore, Row, RowChange, ID_COLUMN};
use crate::error::{ScaleError, ScaleResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// [`RecordStore`] keeping every table in memory. Ids are random UUIDs.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    changes: broadcast::Sender<RowChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            tables: RwLock::new(HashMap::new()),
            changes,
        }
    }

    fn notify(&self, change: RowChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

fn into_object(value: Value, what: &str) -> ScaleResult<Row> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ScaleError::Storage(format!(
            "{what} must be a JSON object, got {other}"
        ))),
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get(ID_COLUMN).and_then(Value::as_str)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, table: &str, record: Value) -> ScaleResult<Row> {
        let mut row = into_object(record, "record")?;
        row.insert(ID_COLUMN.to_string(), Value::String(Uuid::new_v4().to_string()));

        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(row.clone());

        tracing::debug!(table, "Row inserted");
        self.notify(RowChange::Inserted {
            table: table.to_string(),
            row: row.clone(),
        });
        Ok(row)
    }

    async fn query(&self, table: &str, filter: &Filter) -> ScaleResult<Vec<Row>> {
        let tables = self.tables.read().await;
        let rows = tables.get(table).map(Vec::as_slice).unwrap_or_default();
        let matching = rows.iter().filter(|row| filter.matches(row)).cloned();
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> ScaleResult<Row> {
        let patch = into_object(patch, "patch")?;
        let mut tables = self.tables.write().await;
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row_id(row) == Some(id)))
            .ok_or_else(|| ScaleError::Storage(format!("no row '{id}' in table '{table}'")))?;

        for (column, value) in patch {
            if column != ID_COLUMN {
                row.insert(column, value);
            }
        }
        let updated = row.clone();
        drop(tables);

        self.notify(RowChange::Updated {
            table: table.to_string(),
            row: updated.clone(),
        });
        Ok(updated)
    }

    async fn delete(&self, table: &str, id: &str) -> ScaleResult<()> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| ScaleError::Storage(format!("no table '{table}'")))?;
        let before = rows.len();
        rows.retain(|row| row_id(row) != Some(id));
        if rows.len() == before {
            return Err(ScaleError::Storage(format!("no row '{id}' in table '{table}'")));
        }
        drop(tables);

        self.notify(RowChange::Deleted {
            table: table.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RowChange> {
        self.changes.subscribe()
    }
}
