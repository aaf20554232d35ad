//! Statement results

use serde::{Deserialize, Serialize};

/// Outcome of one executed statement
///
/// Values are in PostgreSQL's text format; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names of the last result set (empty when unknown or none)
    pub columns: Vec<String>,
    /// Rows of the last result set
    pub rows: Vec<Vec<Option<String>>>,
    /// Command tag of the last statement, e.g. `SELECT 1` or `CREATE ROLE`
    pub command: Option<String>,
}

impl QueryResult {
    /// Number of rows affected, when the command tag reports one
    ///
    /// `INSERT 0 3` reports 3, `UPDATE 2` reports 2, `CREATE ROLE` reports nothing.
    pub fn affected_rows(&self) -> Option<u64> {
        self.command
            .as_deref()?
            .rsplit(' ')
            .next()
            .and_then(|n| n.parse().ok())
    }

    /// First column of the first row, for single-value queries
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}
