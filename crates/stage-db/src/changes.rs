//! Row-level change notifications.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Events,
    BroadcasterLeases,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A committed write to a single row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowChange {
    pub table: Table,
    pub row_id: String,
    pub kind: ChangeKind,
}

/// Selects the notifications for one row of one table.
#[derive(Debug, Clone)]
pub struct RowChangeFilter {
    table: Table,
    row_id: String,
}

impl RowChangeFilter {
    pub fn row(table: Table, row_id: impl Into<String>) -> Self {
        Self {
            table,
            row_id: row_id.into(),
        }
    }

    pub fn matches(&self, change: &RowChange) -> bool {
        change.table == self.table && change.row_id == self.row_id
    }
}
