//! Relational backing store seam.
//!
//! Translated queries never reach the document store; they are answered from a
//! [`BackingStore`] instead. The proxy only ever needs one capability from it: read every
//! row of a named table, together with the table's column names in declaration order.
//!
//! # Key Components
//!
//! - [`BackingStore`]: Trait implemented by anything that can serve full-table reads.
//! - [`RowSet`]: Column names plus rows of BSON values, in column order.
//! - [`MemoryStore`]: Tables held in memory, built in code or loaded from a JSON fixture.
//!
//! # See Also
//!
//! - [`translate`](crate::translate): Turns find statements into store reads.
pub mod memory;

use std::io;

use bson::{Bson, Document};
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table '{database}.{table}' does not exist")]
    MissingTable { database: String, table: String },

    #[error("row has {actual} values but the table has {expected} columns")]
    RowArity { expected: usize, actual: usize },

    #[error("failed to read table fixture: {0}")]
    Io(#[from] io::Error),

    #[error("invalid table fixture: {0}")]
    Fixture(#[from] serde_json::Error),
}

/// Source of rows for translated queries.
pub trait BackingStore: Send + Sync {
    /// Reads every row of `database.table`.
    fn scan(&self, database: &str, table: &str) -> Result<RowSet, StoreError>;
}

/// The result of a table read: ordered columns and rows of matching arity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    columns: Vec<String>,
    rows: Vec<Vec<Bson>>,
}

impl RowSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<Bson>) -> Result<(), StoreError> {
        if row.len() != self.columns.len() {
            return Err(StoreError::RowArity {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Bson>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One document per row, keyed by column name in column order.
    pub fn into_documents(self) -> Vec<Document> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect::<Document>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    #[should_panic(expected = "RowArity")]
    fn rowset_rejects_short_row() {
        let mut rows = RowSet::new(["id", "name"]);
        rows.push(vec![Bson::Int32(1)]).unwrap();
    }

    #[test]
    fn rowset_documents_keep_column_order() {
        let mut rows = RowSet::new(["zeta", "alpha", "mid"]);
        rows.push(vec![Bson::Int32(1), "a".into(), Bson::Null]).unwrap();
        rows.push(vec![Bson::Int32(2), "b".into(), true.into()]).unwrap();

        let docs = rows.into_documents();
        assert_eq!(docs.len(), 2);
        assert_eq!(
            docs[0].keys().cloned().collect::<Vec<_>>(),
            vec!["zeta", "alpha", "mid"]
        );
        assert_eq!(docs[1], doc! { "zeta": 2, "alpha": "b", "mid": true });
    }
}
