use std::{collections::HashMap, fs::File, io::BufReader, io::Read, path::Path};

use bson::Bson;
use log::{debug, info};
use serde::Deserialize;

use super::{BackingStore, RowSet, StoreError};

/// Fixture layout: `{"<db>": {"<table>": {"columns": [..], "rows": [[..], ..]}}}`.
#[derive(Debug, Deserialize)]
struct TableFixture {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Bson>>,
}

/// Tables held in memory, keyed by database and table name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<(String, String), RowSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every table described by the JSON fixture at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let file = File::open(path.as_ref())?;
        let store = Self::from_reader(BufReader::new(file))?;
        info!(
            "loaded {} table(s) from {}",
            store.tables.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, StoreError> {
        let fixture: HashMap<String, HashMap<String, TableFixture>> =
            serde_json::from_reader(reader)?;

        let mut store = Self::new();
        for (database, tables) in fixture {
            for (table, fixture) in tables {
                let mut rows = RowSet::new(fixture.columns);
                for row in fixture.rows {
                    rows.push(row)?;
                }
                store.insert_table(&database, &table, rows);
            }
        }
        Ok(store)
    }

    /// Adds or replaces a table.
    pub fn insert_table(&mut self, database: &str, table: &str, rows: RowSet) {
        debug!("table {database}.{table}: {} row(s)", rows.len());
        self.tables
            .insert((database.to_string(), table.to_string()), rows);
    }
}

impl BackingStore for MemoryStore {
    fn scan(&self, database: &str, table: &str) -> Result<RowSet, StoreError> {
        self.tables
            .get(&(database.to_string(), table.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::MissingTable {
                database: database.to_string(),
                table: table.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Cursor};

    use tempdir::TempDir;

    use super::*;

    const FIXTURE: &str = r#"{
        "mydb": {
            "widgets": {
                "columns": ["id", "name", "weight"],
                "rows": [[1, "bolt", 0.5], [2, "nut", null]]
            },
            "empty": { "columns": ["id"] }
        }
    }"#;

    #[test]
    fn memory_store_scans_loaded_table() {
        let store = MemoryStore::from_reader(Cursor::new(FIXTURE)).unwrap();
        let rows = store.scan("mydb", "widgets").unwrap();

        assert_eq!(rows.columns(), ["id", "name", "weight"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows()[0][1], Bson::String("bolt".into()));
        assert_eq!(rows.rows()[1][2], Bson::Null);
        assert!(store.scan("mydb", "empty").unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "MissingTable")]
    fn memory_store_missing_table() {
        let store = MemoryStore::from_reader(Cursor::new(FIXTURE)).unwrap();
        store.scan("otherdb", "widgets").unwrap();
    }

    #[test]
    #[should_panic(expected = "RowArity")]
    fn memory_store_fixture_arity() {
        let fixture = r#"{"db": {"t": {"columns": ["a", "b"], "rows": [[1]]}}}"#;
        MemoryStore::from_reader(Cursor::new(fixture)).unwrap();
    }

    #[test]
    fn memory_store_open_file() {
        let temp = TempDir::new("store").unwrap();
        let path = temp.path().join("tables.json");
        fs::write(&path, FIXTURE).unwrap();

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.scan("mydb", "widgets").unwrap().len(), 2);
    }

    #[test]
    fn memory_store_open_missing_file() {
        let temp = TempDir::new("store").unwrap();
        let err = MemoryStore::open(temp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
