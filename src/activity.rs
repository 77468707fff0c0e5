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
use crate::{
    db::{decode, Database},
    model::{Action, ActivityEntry, AuthUser},
    params,
};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{trace, warn};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// One page of the audit trail
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityPage {
    pub logs: Vec<ActivityEntry>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Append-only audit trail in `calculation_logs`
pub struct ActivityLog<'db> {
    db: &'db Database,
}

impl<'db> ActivityLog<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self { db }
    }

    /// Append one entry
    ///
    /// Failures are logged and swallowed, the operation being recorded has already happened.
    pub fn record(
        &self,
        action: Action,
        entity_type: &str,
        entity_id: Option<i64>,
        entity_uuid: Option<&str>,
        user: &AuthUser,
        details: Option<Value>,
    ) {
        let details = details.map(|d| d.to_string());
        let result = self
            .db
            .prepare(
                "INSERT INTO calculation_logs (action, entity_type, entity_id, entity_uuid, user_id, user_name, details, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
            )
            .run(params![
                action.as_str(),
                entity_type,
                entity_id,
                entity_uuid,
                user.id.as_str(),
                user.name.as_str(),
                details
            ]);
        match result {
            Ok(_) => trace!(action = action.as_str(), entity_type, "activity recorded"),
            Err(err) => warn!(
                action = action.as_str(),
                entity_type,
                error = %format!("{:#}", err),
                "cannot record activity"
            ),
        }
    }

    /// Newest entries first
    pub fn list(&self, limit: usize, offset: usize) -> Result<ActivityPage> {
        let rows = self
            .db
            .prepare("SELECT * FROM calculation_logs ORDER BY id DESC LIMIT ? OFFSET ?")
            .all(params![limit as u64, offset as u64])?;
        let logs = rows.into_iter().map(decode).collect::<Result<Vec<ActivityEntry>>>()?;
        let total = self.db.with_document(|doc| doc.table("calculation_logs").len());
        Ok(ActivityPage {
            logs,
            total,
            limit,
            offset,
        })
    }

    /// every entry, newest first
    pub fn all(&self) -> Result<Vec<ActivityEntry>> {
        let rows = self
            .db
            .prepare("SELECT * FROM calculation_logs ORDER BY id DESC")
            .all(params![])?;
        rows.into_iter().map(decode).collect()
    }
}
