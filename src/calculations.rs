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
//! Versioned calculations
//!
//! Editing a calculation never changes its row. Instead a new row with the same
//! `calculation_uuid` and the next version number is inserted, and the previous head of
//! the chain loses its `is_current` flag. The offer number keeps its base across
//! versions, only the suffix follows the version.
//!
//! Deleting only sets `deleted_at`; such rows disappear from [`list`](struct.Calculations.html#method.list)
//! but remain reachable by id.

use crate::{
    activity::ActivityLog,
    db::{decode, Database},
    error::{ServiceError, ServiceResult},
    line_items::{self, Owner},
    model::{Action, AuthUser, Calculation, CalculationDetail, CalculationInput, CalculationType, VersionInfo},
    offer_number::{OfferNumber, OfferNumbers},
    params,
};
use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Identity of a freshly written version
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SavedVersion {
    pub id: i64,
    pub calculation_uuid: String,
    pub version: i64,
    pub offer_number: String,
}

pub struct Calculations<'db> {
    db: &'db Database,
    numbers: OfferNumbers<'db>,
    log: ActivityLog<'db>,
}

impl<'db> Calculations<'db> {
    pub fn new(db: &'db Database, offer_prefix: &str) -> Self {
        Self {
            db,
            numbers: OfferNumbers::new(db, offer_prefix),
            log: ActivityLog::new(db),
        }
    }

    /// Non-deleted rows of every chain, newest first, with the creator's name
    pub fn list(&self) -> ServiceResult<Vec<Calculation>> {
        let rows = self
            .db
            .prepare(
                "SELECT c.*, u.name as created_by_name
                 FROM calculations c
                 LEFT JOIN users u ON c.created_by = u.id
                 WHERE c.deleted_at IS NULL
                 ORDER BY c.id DESC",
            )
            .all(params![])?;
        Ok(rows.into_iter().map(decode).collect::<Result<_>>()?)
    }

    /// One row with its cost sheet, deleted or not
    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> ServiceResult<CalculationDetail> {
        let calc = self
            .find(id)?
            .ok_or_else(|| ServiceError::not_found(format!("calculation {}", id)))?;
        Ok(self.detail(calc)?)
    }

    /// The current version of a chain
    #[instrument(skip(self))]
    pub fn latest_by_uuid(&self, uuid: &str) -> ServiceResult<CalculationDetail> {
        let row = self
            .db
            .prepare(
                "SELECT * FROM calculations WHERE calculation_uuid = ? AND is_current = 1 AND deleted_at IS NULL",
            )
            .get(params![uuid])?
            .ok_or_else(|| ServiceError::not_found(format!("calculation {}", uuid)))?;
        Ok(self.detail(decode(row)?)?)
    }

    /// Version history, newest first; accepts a row id or a calculation uuid
    pub fn versions(&self, id_or_uuid: &str) -> ServiceResult<Vec<VersionInfo>> {
        let uuid = match id_or_uuid.trim().parse::<i64>() {
            Ok(id) => {
                self.find(id)?
                    .ok_or_else(|| ServiceError::not_found(format!("calculation {}", id)))?
                    .calculation_uuid
            }
            Err(_) => id_or_uuid.to_owned(),
        };
        let rows = self
            .db
            .prepare(
                "SELECT c.*, u.name as created_by_name
                 FROM calculations c
                 LEFT JOIN users u ON c.created_by = u.id
                 WHERE c.calculation_uuid = ?
                 ORDER BY c.version DESC",
            )
            .all(params![uuid.as_str()])?;
        if rows.is_empty() {
            return Err(ServiceError::not_found(format!("versions of {}", uuid)));
        }
        let versions = rows
            .into_iter()
            .map(decode::<Calculation>)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|c| VersionInfo {
                id: c.id,
                calculation_uuid: c.calculation_uuid,
                version: c.version,
                changed_at: c.modified_at,
                changed_by: c.created_by_name.unwrap_or_else(|| "Unknown".to_owned()),
                change_description: if c.is_current {
                    "Current version".to_owned()
                } else {
                    format!("Version {}", c.version)
                },
                is_current: c.is_current,
            })
            .collect();
        Ok(versions)
    }

    /// Version 1 of a new calculation
    #[instrument(skip(self, input, user), fields(kunde = ?input.kunde))]
    pub fn create(&self, input: &CalculationInput, user: &AuthUser) -> ServiceResult<SavedVersion> {
        let kunde = validate(input)?;
        let uuid = Uuid::new_v4().to_string();
        let number = self.numbers.allocate(1)?;

        let exec = self
            .db
            .prepare(
                "INSERT INTO calculations (calculation_uuid, version, kunde, created_by, status, calculation_type, offer_number, is_current, parent_version_id, created_at, modified_at)
                 VALUES (?, 1, ?, ?, ?, ?, ?, TRUE, NULL, datetime('now'), datetime('now'))",
            )
            .run(params![
                uuid.as_str(),
                kunde,
                user.id.as_str(),
                status(input),
                input.calculation_type.as_str(),
                number.to_string()
            ])?;
        let id = inserted_id(exec.last_insert_rowid())?;
        self.insert_content(id, input)?;

        self.log.record(
            Action::Create,
            "calculation",
            Some(id),
            Some(uuid.as_str()),
            user,
            Some(json!({
                "kunde": kunde,
                "calculation_type": input.calculation_type.as_str(),
                "offer_number": number.to_string(),
            })),
        );
        info!(id, %number, "calculation created");
        Ok(SavedVersion {
            id,
            calculation_uuid: uuid,
            version: 1,
            offer_number: number.to_string(),
        })
    }

    /// Store edited content as the next version of the chain containing `id`
    ///
    /// Editing an older version still appends after the newest one, so the chain stays linear.
    #[instrument(skip(self, input, user))]
    pub fn update(&self, id: i64, input: &CalculationInput, user: &AuthUser) -> ServiceResult<SavedVersion> {
        let kunde = validate(input)?;
        let edited = self
            .find(id)?
            .ok_or_else(|| ServiceError::not_found(format!("calculation {}", id)))?;
        let head = self.head_of(&edited.calculation_uuid)?.unwrap_or(edited);

        let version = head.version + 1;
        let number = match head.offer_number.as_deref().filter(|n| !n.is_empty()) {
            Some(stored) => OfferNumber::rebase(stored, version),
            None => self.numbers.allocate(version)?,
        };

        self.db
            .prepare("UPDATE calculations SET is_current = FALSE WHERE calculation_uuid = ?")
            .run(params![head.calculation_uuid.as_str()])?;
        let exec = self
            .db
            .prepare(
                "INSERT INTO calculations (calculation_uuid, version, kunde, created_by, status, calculation_type, offer_number, is_current, parent_version_id, created_at, modified_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, ?, datetime('now'), datetime('now'))",
            )
            .run(params![
                head.calculation_uuid.as_str(),
                version,
                kunde,
                head.created_by.clone(),
                status(input),
                input.calculation_type.as_str(),
                number.to_string(),
                head.id
            ])?;
        let new_id = inserted_id(exec.last_insert_rowid())?;
        self.insert_content(new_id, input)?;

        self.log.record(
            Action::Update,
            "calculation",
            Some(new_id),
            Some(head.calculation_uuid.as_str()),
            user,
            Some(json!({
                "kunde": kunde,
                "calculation_type": input.calculation_type.as_str(),
                "offer_number": number.to_string(),
                "version": version,
                "previous_id": head.id,
            })),
        );
        info!(id = new_id, version, %number, "calculation version created");
        Ok(SavedVersion {
            id: new_id,
            calculation_uuid: head.calculation_uuid,
            version,
            offer_number: number.to_string(),
        })
    }

    /// Soft delete; the row, its version chain and its cost sheet stay in place
    #[instrument(skip(self, user))]
    pub fn delete(&self, id: i64, user: &AuthUser) -> ServiceResult<()> {
        let calc = self
            .find(id)?
            .ok_or_else(|| ServiceError::not_found(format!("calculation {}", id)))?;
        let exec = self
            .db
            .prepare("UPDATE calculations SET deleted_at = datetime('now') WHERE id = ? AND deleted_at IS NULL")
            .run(params![id])?;
        if exec.changes > 0 {
            self.log.record(
                Action::Delete,
                "calculation",
                Some(id),
                Some(calc.calculation_uuid.as_str()),
                user,
                Some(json!({
                    "kunde": calc.kunde,
                    "calculation_type": calc.calculation_type.as_str(),
                })),
            );
        }
        Ok(())
    }

    /// Change the title of every live row of a chain, without creating a version
    #[instrument(skip(self))]
    pub fn rename(&self, uuid: &str, title: &str) -> ServiceResult<usize> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ServiceError::validation("title is required"));
        }
        let exec = self
            .db
            .prepare(
                "UPDATE calculations SET kunde = ?, modified_at = datetime('now')
                 WHERE calculation_uuid = ? AND deleted_at IS NULL",
            )
            .run(params![title, uuid])?;
        if exec.changes == 0 {
            return Err(ServiceError::not_found(format!("calculation {}", uuid)));
        }
        Ok(exec.changes)
    }

    fn find(&self, id: i64) -> Result<Option<Calculation>> {
        self.db
            .prepare("SELECT * FROM calculations WHERE id = ?")
            .get(params![id])?
            .map(decode)
            .transpose()
    }

    /// row with the highest version of the chain
    fn head_of(&self, uuid: &str) -> Result<Option<Calculation>> {
        self.db
            .prepare("SELECT * FROM calculations WHERE calculation_uuid = ? ORDER BY version DESC LIMIT 1")
            .get(params![uuid])?
            .map(decode)
            .transpose()
    }

    fn insert_content(&self, id: i64, input: &CalculationInput) -> Result<()> {
        let owner = Owner::Calculation(id);
        match input.calculation_type {
            CalculationType::Garment if !input.items.is_empty() => {
                line_items::insert_garment_items(self.db, owner, &input.items)
            }
            CalculationType::Warehousing => match &input.warehousing {
                Some(wh) => line_items::insert_warehousing(self.db, owner, wh),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Give legacy rows their offer number on first read
    fn backfill(&self, calc: &mut Calculation) -> Result<()> {
        if calc.offer_number.as_deref().map(str::is_empty).unwrap_or(true) {
            let number = self.numbers.allocate(calc.version.max(1))?.to_string();
            self.db
                .prepare("UPDATE calculations SET offer_number = ? WHERE id = ?")
                .run(params![number.as_str(), calc.id])?;
            debug!(id = calc.id, %number, "offer number backfilled");
            calc.offer_number = Some(number);
        }
        Ok(())
    }

    fn detail(&self, mut calc: Calculation) -> Result<CalculationDetail> {
        self.backfill(&mut calc)?;
        let owner = Owner::Calculation(calc.id);
        let (items, warehousing) = match calc.calculation_type {
            CalculationType::Garment => (line_items::garment_items(self.db, owner)?, None),
            CalculationType::Warehousing => (vec![], line_items::warehousing(self.db, owner)?),
        };
        Ok(CalculationDetail {
            calculation: calc,
            items,
            warehousing,
        })
    }
}

/// checks run before anything is written; returns the trimmed customer title
fn validate(input: &CalculationInput) -> ServiceResult<&str> {
    let kunde = input.kunde.as_deref().map(str::trim).unwrap_or("");
    if kunde.is_empty() {
        return Err(ServiceError::validation("kunde is required"));
    }
    line_items::validate_items(&input.items)?;
    Ok(kunde)
}

fn status(input: &CalculationInput) -> &str {
    input
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("draft")
}

fn inserted_id(id: Option<i64>) -> Result<i64> {
    id.ok_or_else(|| anyhow!("store did not allocate an id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch, tester};
    use chrono::{Datelike, Utc};
    use itertools::Itertools;
    use serde_json::Value;

    fn garment(kunde: &str, fob: &str) -> CalculationInput {
        serde_json::from_value(json!({
            "kunde": kunde,
            "calculation_type": "garment",
            "items": [{ "item_number": 1, "fob_preis_usd": fob, "kurs": "1,08" }]
        }))
        .unwrap()
    }

    fn base_of(number: &str) -> String {
        number.parse::<OfferNumber>().unwrap().base().to_owned()
    }

    #[test]
    fn create_then_version() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let user = tester();

        let first = calcs.create(&garment("Acme", "100,00"), &user).unwrap();
        assert_eq!(first.version, 1);
        let prefix = format!("FHD{}-", Utc::now().year());
        assert!(first.offer_number.starts_with(&prefix), "{}", first.offer_number);
        assert!(first.offer_number.ends_with(".1"));
        assert_eq!(first.offer_number.len(), prefix.len() + 6);

        let second = calcs.update(first.id, &garment("Acme", "110,00"), &user).unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(second.version, 2);
        assert_eq!(second.calculation_uuid, first.calculation_uuid);
        assert_eq!(second.offer_number, format!("{}.2", base_of(&first.offer_number)));

        let old = calcs.get(first.id).unwrap();
        assert!(!old.calculation.is_current);
        assert_eq!(old.items[0].costs.fob_preis_usd, Some(100.0));
        let new = calcs.get(second.id).unwrap();
        assert!(new.calculation.is_current);
        assert_eq!(new.calculation.parent_version_id, Some(first.id));
        assert_eq!(new.items[0].costs.fob_preis_usd, Some(110.0));
        assert_eq!(new.items[0].costs.kurs, Some(1.08));
    }

    #[test]
    fn german_decimals_round_trip() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let saved = calcs.create(&garment("Acme", "1.234,56"), &tester()).unwrap();
        let detail = calcs.get(saved.id).unwrap();
        assert_eq!(detail.items[0].costs.fob_preis_usd, Some(1234.56));
    }

    #[test]
    fn version_chain_stays_linear() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let user = tester();
        let first = calcs.create(&garment("Acme", "1"), &user).unwrap();
        let mut last = first.clone();
        for _ in 0..3 {
            last = calcs.update(last.id, &garment("Acme", "2"), &user).unwrap();
        }
        // editing an old version appends after the newest one
        let branch = calcs.update(first.id, &garment("Acme", "3"), &user).unwrap();
        assert_eq!(branch.version, 5);

        let chain = calcs.versions(&first.calculation_uuid).unwrap();
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.iter().filter(|v| v.is_current).count(), 1);
        assert_eq!(chain[0].version, 5);
        assert!(chain[0].is_current);
        assert_eq!(chain[0].change_description, "Current version");
        assert_eq!(chain[1].change_description, "Version 4");
        assert_eq!(chain[0].changed_by, "Unknown");

        let bases = chain
            .iter()
            .map(|v| base_of(&calcs.get(v.id).unwrap().calculation.offer_number.unwrap()))
            .unique()
            .count();
        assert_eq!(bases, 1);

        let latest = calcs.latest_by_uuid(&first.calculation_uuid).unwrap();
        assert_eq!(latest.calculation.id, branch.id);
        assert_eq!(latest.calculation.parent_version_id, Some(last.id));

        // numeric ids resolve to their chain
        assert_eq!(calcs.versions(&first.id.to_string()).unwrap().len(), 5);
    }

    #[test]
    fn soft_delete_then_list() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let user = tester();
        let keep = calcs.create(&garment("Keep", "1"), &user).unwrap();
        let gone = calcs.create(&garment("Gone", "1"), &user).unwrap();
        calcs.delete(gone.id, &user).unwrap();

        let listed = calcs.list().unwrap().into_iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(listed, vec![keep.id]);
        let deleted = calcs.get(gone.id).unwrap();
        assert!(deleted.calculation.deleted_at.is_some());
        assert!(matches!(
            calcs.latest_by_uuid(&gone.calculation_uuid),
            Err(ServiceError::NotFound(_))
        ));

        let actions = ActivityLog::new(&db)
            .all()
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect::<Vec<_>>();
        assert_eq!(actions, vec!["DELETE", "CREATE", "CREATE"]);
    }

    #[test]
    fn legacy_rows_are_backfilled_once() {
        let (_dir, db) = scratch();
        db.prepare("INSERT INTO calculations (calculation_uuid, version, kunde, calculation_type, is_current) VALUES ('legacy', 2, 'Alt', 'garment', 1)")
            .run(params![])
            .unwrap();
        let calcs = Calculations::new(&db, "FHD");
        let first = calcs.get(1).unwrap().calculation.offer_number.unwrap();
        let second = calcs.get(1).unwrap().calculation.offer_number.unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with(".2"));
        let counters = db.with_document(|doc| doc.table("counters_table").to_vec());
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0]["value"], 1);

        // the legacy numeric flag is still found by uuid
        let latest = calcs.latest_by_uuid("legacy").unwrap();
        assert_eq!(latest.calculation.offer_number, Some(first));
    }

    #[test]
    fn validation_happens_before_writes() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let before = db.with_document(|doc| doc.clone());

        let err = calcs.create(&garment("  ", "1"), &tester()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        let mut many = garment("Acme", "1");
        many.items = vec![many.items[0].clone(); 11];
        assert!(matches!(calcs.create(&many, &tester()), Err(ServiceError::Validation(_))));
        assert!(matches!(
            calcs.update(99, &garment("Acme", "1"), &tester()),
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(calcs.delete(99, &tester()), Err(ServiceError::NotFound(_))));
        assert!(matches!(calcs.get(99), Err(ServiceError::NotFound(_))));
        assert!(matches!(calcs.versions("nope"), Err(ServiceError::NotFound(_))));

        assert_eq!(db.with_document(|doc| doc.clone()), before);
    }

    #[test]
    fn warehousing_calculation() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let input: CalculationInput = serde_json::from_value(json!({
            "kunde": "Lager GmbH",
            "calculation_type": "warehousing",
            "warehousing": { "flaeche_m2": "1.500,0", "preis_m2": "4,25", "bemerkungen": "Halle 2" }
        }))
        .unwrap();
        let saved = calcs.create(&input, &tester()).unwrap();
        let detail = calcs.get(saved.id).unwrap();
        assert!(detail.items.is_empty());
        let wh = detail.warehousing.unwrap();
        assert_eq!(wh.preis_m2, Some(4.25));
        assert_eq!(wh.bemerkungen.as_deref(), Some("Halle 2"));

        let json = serde_json::to_value(calcs.get(saved.id).unwrap()).unwrap();
        assert_eq!(json["calculation_type"], "warehousing");
        assert_eq!(json["warehousing"]["preis_m2"], 4.25);
        assert_eq!(json.get("items"), None::<&Value>);
    }

    #[test]
    fn rename_touches_every_live_version() {
        let (_dir, db) = scratch();
        let calcs = Calculations::new(&db, "FHD");
        let user = tester();
        let first = calcs.create(&garment("Acme", "1"), &user).unwrap();
        let second = calcs.update(first.id, &garment("Acme", "1"), &user).unwrap();

        assert_eq!(calcs.rename(&first.calculation_uuid, "  Acme AG ").unwrap(), 2);
        assert_eq!(calcs.get(second.id).unwrap().calculation.kunde.as_deref(), Some("Acme AG"));
        assert!(matches!(
            calcs.rename(&first.calculation_uuid, " "),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(calcs.rename("unknown", "x"), Err(ServiceError::NotFound(_))));
        // renaming does not create a version
        assert_eq!(calcs.versions(&first.calculation_uuid).unwrap().len(), 2);
    }
}
