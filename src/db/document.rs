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
use super::{timestamp, Persistence, Record};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, trace_span, warn};

/// Tables that every document carries, even when empty
pub const KNOWN_TABLES: &[&str] = &[
    "users",
    "calculations",
    "garment_data",
    "warehousing_data",
    "offers",
    "garment_offer_data",
    "warehousing_offer_data",
    "calculation_logs",
    COUNTERS_TABLE,
];

/// Table holding named counters such as the yearly offer number sequence
pub const COUNTERS_TABLE: &str = "counters_table";

/// The complete persisted state: every table plus the per-table id counters
///
/// Serialized as one JSON object whose keys are the table names and `counters`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
    #[serde(flatten)]
    pub tables: BTreeMap<String, Vec<Record>>,
}

impl Document {
    /// An empty document with all known tables present and zeroed counters
    pub fn empty() -> Self {
        let mut doc = Self::default();
        doc.ensure_known_tables();
        doc
    }

    /// add whatever known tables or counters an older file may be missing
    pub fn ensure_known_tables(&mut self) {
        for table in KNOWN_TABLES {
            self.tables.entry((*table).to_owned()).or_default();
            if *table != COUNTERS_TABLE {
                self.counters.entry((*table).to_owned()).or_insert(0);
            }
        }
    }

    pub fn table(&self, name: &str) -> &[Record] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// In-memory document plus the backend it is persisted to
///
/// Every mutation is followed by a full rewrite through [`save`](#method.save);
/// there is no incremental persistence.
pub struct DocumentStore {
    doc: Document,
    backend: Box<dyn Persistence>,
}

impl DocumentStore {
    /// Load the document from the backend, starting fresh when it is absent or unreadable
    #[instrument(skip(backend), fields(backend = backend.name()))]
    pub fn open(mut backend: Box<dyn Persistence>) -> Result<Self> {
        let loaded = trace_span!("load").in_scope(|| backend.load());
        let (doc, fresh) = match loaded {
            Ok(Some(mut doc)) => {
                doc.ensure_known_tables();
                (doc, false)
            }
            Ok(None) => {
                info!("no stored document, initializing");
                (Document::empty(), true)
            }
            Err(err) => {
                warn!(error = %format!("{:#}", err), "stored document unreadable, starting fresh");
                (Document::empty(), true)
            }
        };
        let mut store = Self { doc, backend };
        if fresh {
            store.save()?;
        }
        debug!(tables = store.doc.tables.len(), "document loaded");
        Ok(store)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Overwrite the backend with the whole in-memory document
    pub fn save(&mut self) -> Result<()> {
        let span = trace_span!("save", backend = self.backend.name());
        let _guard = span.enter();
        self.backend.save(&self.doc)
    }

    /// Next id for the table; ids are never handed out twice, even after deletes
    pub fn next_id(&mut self, table: &str) -> i64 {
        let counter = self.doc.counters.entry(table.to_owned()).or_insert(0);
        *counter += 1;
        *counter
    }

    pub fn table(&self, name: &str) -> &[Record] {
        self.doc.table(name)
    }

    pub fn table_mut(&mut self, name: &str) -> &mut Vec<Record> {
        self.doc.tables.entry(name.to_owned()).or_default()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.doc.tables.contains_key(name)
    }

    /// Apply a mutation and persist it; when the save fails the document is restored
    pub fn commit<T>(&mut self, mutate: impl FnOnce(&mut Self) -> T) -> Result<T> {
        let before = self.doc.clone();
        let out = mutate(self);
        if let Err(err) = self.save() {
            warn!(error = %format!("{:#}", err), "save failed, change discarded");
            self.doc = before;
            return Err(err);
        }
        Ok(out)
    }

    /// Increment the named counter row in `counters_table`, creating it with 1 on first use
    ///
    /// Lookup, increment and persistence happen in one step so that no other statement
    /// can observe or allocate the same value.
    pub fn bump_counter(&mut self, key: &str) -> Result<i64> {
        let value = self.commit(|store| store.advance_counter(key))?;
        debug!(key, value, "counter advanced");
        Ok(value)
    }

    fn advance_counter(&mut self, key: &str) -> i64 {
        let existing = self
            .table_mut(COUNTERS_TABLE)
            .iter_mut()
            .find(|row| row.get("key").and_then(Value::as_str) == Some(key));
        match existing {
            Some(row) => {
                let current = row.get("value").and_then(counter_value).unwrap_or(0);
                row.insert("value".to_owned(), Value::from(current + 1));
                current + 1
            }
            None => {
                let id = self.next_id(COUNTERS_TABLE);
                let mut row = Record::new();
                row.insert("id".to_owned(), Value::from(id));
                row.insert("key".to_owned(), Value::from(key));
                row.insert("value".to_owned(), Value::from(1));
                row.insert("created_at".to_owned(), Value::from(timestamp()));
                self.table_mut(COUNTERS_TABLE).push(row);
                1
            }
        }
    }
}

fn counter_value(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}
