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
//! The admin area: unlocking it with the shared admin password, reading the audit
//! trail, and exporting the whole database
//!
//! Unlocking is rate limited per user: after [`MAX_ATTEMPTS`](constant.MAX_ATTEMPTS.html)
//! wrong passwords the user is locked out for [`LOCKOUT`](constant.LOCKOUT.html), counted
//! from the last failed attempt.

use crate::{
    activity::{ActivityLog, ActivityPage, DEFAULT_PAGE_SIZE},
    db::{decode, Database, Record},
    error::{ServiceError, ServiceResult},
    model::{Action, ActivityEntry, AuthUser, Calculation, GarmentItem, Offer, Warehousing},
    params,
};
use anyhow::Result;
use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::{
    cell::RefCell,
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::{info, instrument, warn};

pub const MAX_ATTEMPTS: u32 = 5;
pub const LOCKOUT: Duration = Duration::from_secs(15 * 60);

/// The configured admin password, either a bcrypt hash or plain text
#[derive(Clone, Debug, PartialEq)]
pub enum AdminSecret {
    Hash(String),
    Plain(String),
    /// nothing configured, every attempt fails
    Unset,
}

impl AdminSecret {
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) if v.starts_with("$2") => AdminSecret::Hash(v.to_owned()),
            Some(v) => AdminSecret::Plain(v.to_owned()),
            None => AdminSecret::Unset,
        }
    }

    fn check(&self, password: &str) -> Result<bool> {
        Ok(match self {
            AdminSecret::Hash(hash) => bcrypt::verify(password, hash)?,
            AdminSecret::Plain(plain) => plain == password,
            AdminSecret::Unset => false,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Attempts {
    failed: u32,
    last: Instant,
}

/// Guards the admin area, keeping failed attempts per user in memory
pub struct AdminGate<'db> {
    secret: AdminSecret,
    log: ActivityLog<'db>,
    attempts: RefCell<HashMap<String, Attempts>>,
}

impl<'db> AdminGate<'db> {
    pub fn new(db: &'db Database, secret: AdminSecret) -> Self {
        if secret == AdminSecret::Unset {
            warn!("no admin password configured, the admin area cannot be unlocked");
        }
        Self {
            secret,
            log: ActivityLog::new(db),
            attempts: RefCell::new(HashMap::new()),
        }
    }

    pub fn verify(&self, user: &AuthUser, password: &str) -> ServiceResult<()> {
        self.verify_at(user, password, Instant::now())
    }

    #[instrument(skip(self, user, password, now), fields(user_id = %user.id))]
    pub fn verify_at(&self, user: &AuthUser, password: &str, now: Instant) -> ServiceResult<()> {
        {
            let mut attempts = self.attempts.borrow_mut();
            let entry = attempts.entry(user.id.clone()).or_insert(Attempts {
                failed: 0,
                last: now,
            });
            let since_last = now.saturating_duration_since(entry.last);
            if since_last > LOCKOUT {
                entry.failed = 0;
            }
            if entry.failed >= MAX_ATTEMPTS {
                let left = LOCKOUT - since_last;
                let minutes = (left.as_secs() + 59) / 60;
                return Err(ServiceError::TooManyAttempts { minutes });
            }
            if password.is_empty() {
                return Err(ServiceError::validation("password required"));
            }
            if !self.secret.check(password)? {
                entry.failed += 1;
                entry.last = now;
                warn!(failed = entry.failed, "wrong admin password");
                return Err(ServiceError::Unauthorized {
                    remaining_attempts: Some(MAX_ATTEMPTS.saturating_sub(entry.failed)),
                });
            }
            attempts.remove(&user.id);
        }
        self.log
            .record(Action::AdminAccess, "admin_panel", None, None, user, None);
        info!("admin area unlocked");
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportedCalculation {
    #[serde(flatten)]
    pub calculation: Calculation,
    pub created_by_email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<GarmentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehousing: Option<Warehousing>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExportedOffer {
    #[serde(flatten)]
    pub offer: Offer,
    pub created_by_email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<GarmentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehousing: Option<Warehousing>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub total_calculations: usize,
    pub active_calculations: usize,
    pub deleted_calculations: usize,
    pub total_offers: usize,
    pub active_offers: usize,
    pub deleted_offers: usize,
    pub total_logs: usize,
}

/// Everything in the database, deleted rows included
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Export {
    pub export_date: String,
    pub exported_by: String,
    pub calculations: Vec<ExportedCalculation>,
    pub offers: Vec<ExportedOffer>,
    pub logs: Vec<ActivityEntry>,
    pub summary: ExportSummary,
}

/// Admin-only views; every call checks the caller's role
pub struct Admin<'db> {
    db: &'db Database,
    log: ActivityLog<'db>,
}

impl<'db> Admin<'db> {
    pub fn new(db: &'db Database) -> Self {
        Self {
            db,
            log: ActivityLog::new(db),
        }
    }

    /// Audit trail page, 100 entries from the newest by default
    pub fn logs(&self, user: &AuthUser, limit: Option<usize>, offset: Option<usize>) -> ServiceResult<ActivityPage> {
        require_admin(user)?;
        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_SIZE);
        Ok(self.log.list(limit, offset.unwrap_or(0))?)
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub fn export(&self, user: &AuthUser) -> ServiceResult<Export> {
        require_admin(user)?;

        let mut garment = children::<GarmentItem>(self.db, "garment_data", "calculation_id")?;
        let mut warehousing = children::<Warehousing>(self.db, "warehousing_data", "calculation_id")?;
        let calculations = self
            .db
            .prepare(
                "SELECT c.*, u.name as created_by_name, u.email as created_by_email
                 FROM calculations c
                 LEFT JOIN users u ON c.created_by = u.id
                 ORDER BY c.id DESC",
            )
            .all(params![])?
            .into_iter()
            .map(|row| {
                let created_by_email = text_field(&row, "created_by_email");
                let calculation = decode::<Calculation>(row)?;
                Ok(ExportedCalculation {
                    items: garment.remove(&calculation.id).unwrap_or_default(),
                    warehousing: warehousing
                        .remove(&calculation.id)
                        .and_then(|w| w.into_iter().next()),
                    created_by_email,
                    calculation,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut garment = children::<GarmentItem>(self.db, "garment_offer_data", "offer_id")?;
        let mut warehousing = children::<Warehousing>(self.db, "warehousing_offer_data", "offer_id")?;
        let offers = self
            .db
            .prepare(
                "SELECT o.*, u.name as created_by_name, u.email as created_by_email
                 FROM offers o
                 LEFT JOIN users u ON o.created_by = u.id
                 ORDER BY o.id DESC",
            )
            .all(params![])?
            .into_iter()
            .map(|row| {
                let created_by_email = text_field(&row, "created_by_email");
                let offer = decode::<Offer>(row)?;
                Ok(ExportedOffer {
                    items: garment.remove(&offer.id).unwrap_or_default(),
                    warehousing: warehousing.remove(&offer.id).and_then(|w| w.into_iter().next()),
                    created_by_email,
                    offer,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let logs = self.log.all()?;
        let deleted_calculations = calculations
            .iter()
            .filter(|c| c.calculation.deleted_at.is_some())
            .count();
        let deleted_offers = offers.iter().filter(|o| o.offer.deleted_at.is_some()).count();
        let summary = ExportSummary {
            total_calculations: calculations.len(),
            active_calculations: calculations.len() - deleted_calculations,
            deleted_calculations,
            total_offers: offers.len(),
            active_offers: offers.len() - deleted_offers,
            deleted_offers,
            total_logs: logs.len(),
        };

        self.log.record(
            Action::Export,
            "database",
            None,
            None,
            user,
            Some(json!({
                "totalCalculations": summary.total_calculations,
                "totalOffers": summary.total_offers,
            })),
        );
        info!(calculations = summary.total_calculations, offers = summary.total_offers, "database exported");
        Ok(Export {
            export_date: crate::db::timestamp(),
            exported_by: user.name.clone(),
            calculations,
            offers,
            logs,
            summary,
        })
    }
}

fn require_admin(user: &AuthUser) -> ServiceResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ServiceError::forbidden("admin access required"))
    }
}

fn text_field(row: &Record, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_owned)
}

/// all rows of a child table grouped by owner id, in item order
fn children<T: DeserializeOwned>(db: &Database, table: &str, owner: &str) -> Result<HashMap<i64, Vec<T>>> {
    let sql = format!("SELECT * FROM {} ORDER BY item_number ASC", table);
    db.prepare(&sql)
        .all(params![])?
        .into_iter()
        .filter_map(|row| {
            let id = row.get(owner).and_then(Value::as_i64)?;
            Some(decode::<T>(row).map(|child| (id, child)))
        })
        .collect::<Result<Vec<_>>>()
        .map(|pairs| pairs.into_iter().into_group_map())
}
