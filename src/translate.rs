//! Find-statement translation.
//!
//! A *findable* statement is a command-style query on a non-admin database whose first key
//! is `find`. Instead of reaching the document store it is answered from the
//! [`BackingStore`]: the value of `find` names the table, the database name names the
//! schema, and every row comes back as one document of the reply's first batch.
//!
//! The optional `filter` and `limit` keys are looked up by name rather than by position,
//! so drivers that emit them in a different order are understood too. They are validated
//! and logged; the store read itself is always a full-table read.
use bson::{Bson, Document, doc};
use log::debug;
use thiserror::Error;

use crate::{
    storage::{BackingStore, StoreError},
    wire::{QueryMessage, ReplyFlags, ReplyMessage},
};

const FIND: &str = "find";
const FILTER: &str = "filter";
const LIMIT: &str = "limit";

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("query on '{0}' is not a find statement")]
    NotFindable(String),

    #[error("invalid '{field}' in find statement: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("backing store read failed: {0}")]
    Store(#[from] StoreError),
}

/// True for command queries outside `admin` whose verb is `find`.
pub fn is_findable(query: &QueryMessage) -> bool {
    !query.namespace.starts_with("admin.")
        && query.is_command()
        && query.command_name() == Some(FIND)
}

/// A parsed find statement.
#[derive(Debug, Clone, PartialEq)]
pub struct FindStatement {
    pub database: String,
    pub table: String,
    pub filter: Option<Document>,
    pub limit: Option<i64>,
}

impl FindStatement {
    pub fn parse(query: &QueryMessage) -> Result<Self, TranslateError> {
        if !is_findable(query) {
            return Err(TranslateError::NotFindable(query.namespace.clone()));
        }

        let table = match query.query.get(FIND) {
            Some(Bson::String(table)) if !table.is_empty() => table.clone(),
            other => {
                return Err(TranslateError::InvalidField {
                    field: FIND,
                    reason: format!("expected a collection name, got {other:?}"),
                });
            }
        };

        let filter = match query.query.get(FILTER) {
            None => None,
            Some(Bson::Document(filter)) => Some(filter.clone()),
            Some(other) => {
                return Err(TranslateError::InvalidField {
                    field: FILTER,
                    reason: format!("expected a document, got {other}"),
                });
            }
        };

        let limit = match query.query.get(LIMIT) {
            None => None,
            Some(Bson::Int32(n)) => Some(i64::from(*n)),
            Some(Bson::Int64(n)) => Some(*n),
            Some(Bson::Double(n)) if n.fract() == 0.0 => Some(*n as i64),
            Some(other) => {
                return Err(TranslateError::InvalidField {
                    field: LIMIT,
                    reason: format!("expected an integer, got {other}"),
                });
            }
        };

        Ok(Self {
            database: query.database().to_string(),
            table,
            filter,
            limit,
        })
    }

    /// Namespace reported back to the client: `<database>.<table>`.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

/// Answers find statements from a backing store.
pub struct Translator<'a> {
    store: &'a dyn BackingStore,
}

impl<'a> Translator<'a> {
    pub fn new(store: &'a dyn BackingStore) -> Self {
        Self { store }
    }

    /// Parses `query`, reads the target table and wraps its rows in a cursor reply.
    pub fn translate(&self, query: &QueryMessage) -> Result<ReplyMessage, TranslateError> {
        let statement = FindStatement::parse(query)?;
        debug!(
            "find database={} table={} filter={:?} limit={:?}",
            statement.database, statement.table, statement.filter, statement.limit
        );
        self.execute(&statement)
    }

    pub fn execute(&self, statement: &FindStatement) -> Result<ReplyMessage, TranslateError> {
        let rows = self.store.scan(&statement.database, &statement.table)?;
        debug!("columns={:?} rows={}", rows.columns(), rows.len());

        let batch = rows
            .into_documents()
            .into_iter()
            .map(Bson::Document)
            .collect::<Vec<_>>();

        let documents = doc! {
            "cursor": {
                "firstBatch": batch,
                "id": 0_i64,
                "ns": statement.namespace(),
            },
            "ok": 1,
        };
        Ok(ReplyMessage::single(
            ReplyFlags::SHARD_CONFIG_STALE,
            documents,
        ))
    }
}
