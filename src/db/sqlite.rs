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
use super::{Document, Persistence, Record};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, NO_PARAMS};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, field, info, instrument, trace_span};

/// name of the SQLite table holding the serialized document
pub const DOCUMENTS_TABLE_NAME: &str = "documents";
/// row name under which the per-table id counters are kept
const COUNTERS_ROW: &str = "counters";

/// Backend keeping the document inside an embedded SQLite database, based on the rusqlite crate
///
/// Each table is stored as one row holding its records as a JSON array. A save replaces
/// all rows within one SQLite transaction, so readers see either the old or the new
/// document, never a mix.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    pub fn new(db_name: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = trace_span!("connect").in_scope(|| -> Result<_> {
            let conn = Connection::open_with_flags(PathBuf::from(db_name), flags)?;

            // `PRAGMA journal_mode = WAL;` https://www.sqlite.org/wal.html
            // This PRAGMA statement returns the new journal mode, so we need to see if it succeeded
            conn.query_row("PRAGMA journal_mode = WAL;", NO_PARAMS, |row| {
                match row.get::<_, String>(0)?.as_str() {
                    "wal" | "memory" => Ok(()),
                    _ => Err(rusqlite::Error::InvalidQuery),
                }
            })?;
            // every save must be on disk before the caller continues
            conn.execute("PRAGMA synchronous = FULL;", NO_PARAMS)?;

            debug!("new connection");
            Ok(conn)
        })?;

        conn.execute_batch(&format!(
            "create table if not exists {} (name text primary key, body text not null);",
            DOCUMENTS_TABLE_NAME
        ))?;
        info!(db_name, "initialization complete");

        Ok(Self { conn })
    }
}

impl Persistence for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite(rusqlite)"
    }

    #[instrument(skip(self), level = "trace")]
    fn load(&mut self) -> Result<Option<Document>> {
        let mut select = self
            .conn
            .prepare(&format!("select name, body from {}", DOCUMENTS_TABLE_NAME))?;
        let rows = select
            .query(NO_PARAMS)?
            .mapped(|row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)));

        let mut doc = Document::default();
        let mut found = false;
        for row in rows {
            let (name, body) = row?;
            found = true;
            if name == COUNTERS_ROW {
                doc.counters = serde_json::from_str::<BTreeMap<String, i64>>(&body)
                    .context("parsing stored counters")?;
            } else {
                let records = serde_json::from_str::<Vec<Record>>(&body)
                    .with_context(|| format!("parsing stored table {}", name))?;
                doc.tables.insert(name, records);
            }
        }
        Ok(if found { Some(doc) } else { None })
    }

    #[instrument(skip(self, doc), level = "trace")]
    fn save(&mut self, doc: &Document) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(&format!("delete from {}", DOCUMENTS_TABLE_NAME), NO_PARAMS)?;

        let span = trace_span!("writing tables", tables = field::Empty);
        let guard = span.enter();
        let insert = format!("insert into {} (name, body) values (?, ?)", DOCUMENTS_TABLE_NAME);
        {
            let mut stmt = tx.prepare(&insert)?;
            stmt.execute(params![COUNTERS_ROW, serde_json::to_string(&doc.counters)?])?;
            for (name, records) in &doc.tables {
                stmt.execute(params![name, serde_json::to_string(records)?])?;
            }
        }
        span.record("tables", &doc.tables.len());
        drop(guard);
        drop(span);

        tx.commit()?;
        debug!(tables = doc.tables.len(), "done writing");
        Ok(())
    }
}
