/*
 * Copyright 2020 Actyx AG
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
//! A relational-looking façade over a single JSON document
//!
//! The core is the [`Database`](struct.Database.html) handle, which keeps a
//! [`Document`](struct.Document.html) in memory (table name to ordered list of flat
//! records) and offers the familiar `prepare` / `run` / `get` / `all` interface:
//!
//! ```rust,no_run
//! # use fhd_calc_store::{db::Database, params};
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::open_json("data/database.json")?;
//! let inserted = db
//!     .prepare("INSERT INTO users (email, name, role, active) VALUES (?, ?, 'admin', 1)")
//!     .run(params!["admin@fhd.agency", "Administrator"])?;
//! let admin = db
//!     .prepare("SELECT * FROM users WHERE id = ? AND active = 1")
//!     .get(params![inserted.last_insert_id.clone()])?;
//! # Ok(())
//! # }
//! ```
//!
//! Only the statement shapes the application itself issues are understood, see the
//! [`parser`](parser/index.html) module for the grammar. Text that does not match any
//! of them yields no rows and no changes instead of an error.
//!
//! # Data storage format
//!
//! The whole document is written after every mutating statement, through a
//! [`Persistence`](trait.Persistence.html) backend. The default backend is a
//! pretty-printed JSON file, [`SqliteBackend`](struct.SqliteBackend.html) keeps the
//! same document inside an embedded SQLite database instead. Record ids come from
//! per-table counters stored alongside the tables under the `counters` key.
//!
//! # Concurrency
//!
//! The document lives in a `RefCell`, so a `Database` can be shared by reference within
//! one thread but is neither `Sync` nor safe to duplicate across processes. Each
//! statement runs to completion before the next one can start.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{cell::RefCell, iter::repeat, path::Path};
use tracing::{debug, instrument};

mod document;
mod executor;
mod json_file;
pub mod parser;
mod sqlite;

pub use document::{Document, DocumentStore, COUNTERS_TABLE, KNOWN_TABLES};
pub use json_file::JsonFileBackend;
pub use parser::Statement as ParsedStatement;
pub use sqlite::SqliteBackend;

/// One row of a table: a flat map from field name to JSON value
pub type Record = serde_json::Map<String, Value>;

/// Build a positional parameter slice for [`Statement`](db/struct.Statement.html) calls
///
/// Every argument is converted with `serde_json::Value::from`, so strings, numbers,
/// booleans and `Option`s of those can be mixed freely.
#[macro_export]
macro_rules! params {
    () => {
        &[] as &[serde_json::Value]
    };
    ($($param:expr),+ $(,)?) => {
        &[$(serde_json::Value::from($param)),+] as &[serde_json::Value]
    };
}

/// Storage for the serialized document
///
/// Implementations must write the whole document on every `save` and report an error
/// only when the data did not reach durable storage.
pub trait Persistence {
    /// human readable name for logging
    fn name(&self) -> &'static str;
    /// read the stored document, `None` when nothing has been stored yet
    fn load(&mut self) -> Result<Option<Document>>;
    /// replace the stored document
    fn save(&mut self, doc: &Document) -> Result<()>;
}

/// Result of a mutating statement
#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    /// number of records inserted, updated or removed
    pub changes: usize,
    /// id of the record created by an INSERT, `Null` otherwise
    pub last_insert_id: Value,
}

impl Execution {
    pub fn none() -> Self {
        Self {
            changes: 0,
            last_insert_id: Value::Null,
        }
    }

    /// the inserted id as an integer, if it is one
    pub fn last_insert_rowid(&self) -> Option<i64> {
        self.last_insert_id.as_i64()
    }
}

/// Current instant as ISO-8601 with millisecond precision, e.g. `2025-03-01T09:30:00.000Z`
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Read a result row as a typed record
pub fn decode<T: DeserializeOwned>(row: Record) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Compose `insert into <table> (<columns>) values (?, ?, ...)` with one placeholder per column
pub fn insert_statement<'a>(table: &str, columns: impl IntoIterator<Item = &'a str>) -> String {
    let columns = columns.into_iter().collect::<Vec<_>>();
    let holes = repeat("?").take(columns.len()).collect::<Vec<_>>().join(", ");
    format!(
        "insert into {} ({}) values ({})",
        table,
        columns.join(", "),
        holes
    )
}

/// Handle to the document store
pub struct Database {
    store: RefCell<DocumentStore>,
}

impl Database {
    pub fn open(backend: Box<dyn Persistence>) -> Result<Self> {
        let store = DocumentStore::open(backend)?;
        Ok(Self {
            store: RefCell::new(store),
        })
    }

    pub fn open_json(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Box::new(JsonFileBackend::new(path)))
    }

    pub fn open_sqlite(path: &str) -> Result<Self> {
        Self::open(Box::new(SqliteBackend::new(path)?))
    }

    /// Parse a statement for later execution
    ///
    /// Parsing never fails: unrecognized text produces a statement that does nothing.
    pub fn prepare(&self, sql: &str) -> Statement<'_> {
        let parsed = parser::parse(sql);
        if parsed.is_none() {
            debug!(sql, "unrecognized statement");
        }
        Statement { db: self, parsed }
    }

    /// Advance a named counter under `counters` and return its new value
    #[instrument(skip(self), level = "debug")]
    pub fn bump_counter(&self, key: &str) -> Result<i64> {
        self.store.borrow_mut().bump_counter(key)
    }

    /// Run a closure against a read-only view of the whole document
    pub fn with_document<T>(&self, f: impl FnOnce(&Document) -> T) -> T {
        f(self.store.borrow().document())
    }
}

/// A prepared statement, reusable with different parameters
pub struct Statement<'a> {
    db: &'a Database,
    parsed: Option<parser::Statement>,
}

impl<'a> Statement<'a> {
    pub fn is_recognized(&self) -> bool {
        self.parsed.is_some()
    }

    /// Execute for its effect; SELECT statements report zero changes
    pub fn run(&self, params: &[Value]) -> Result<Execution> {
        match self.execute(params)? {
            executor::Outcome::Changed(exec) => Ok(exec),
            executor::Outcome::Rows(_) => Ok(Execution::none()),
        }
    }

    /// First result row, if any
    pub fn get(&self, params: &[Value]) -> Result<Option<Record>> {
        Ok(self.all(params)?.into_iter().next())
    }

    /// All result rows
    pub fn all(&self, params: &[Value]) -> Result<Vec<Record>> {
        match self.execute(params)? {
            executor::Outcome::Rows(rows) => Ok(rows),
            executor::Outcome::Changed(_) => Ok(vec![]),
        }
    }

    fn execute(&self, params: &[Value]) -> Result<executor::Outcome> {
        match &self.parsed {
            Some(stmt) => {
                let mut store = self.db.store.borrow_mut();
                executor::execute(&mut store, stmt, params)
            }
            None => Ok(executor::Outcome::Rows(vec![])),
        }
    }
}
