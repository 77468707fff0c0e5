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
//! Child rows holding the cost sheets of calculations and offers
//!
//! Calculations keep theirs in `garment_data` / `warehousing_data`, offers keep a frozen
//! copy in `garment_offer_data` / `warehousing_offer_data`. The columns are the same,
//! only the owner reference differs.

use crate::{
    db::{decode, insert_statement, Database},
    error::{ServiceError, ServiceResult},
    model::{DbRecord, GarmentCosts, GarmentItem, GarmentItemInput, Warehousing, WarehousingInput},
    params,
};
use anyhow::Result;
use serde_json::Value;
use std::iter::once;
use tracing::trace;

/// most garments one calculation or offer may carry
pub const MAX_ITEMS: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Calculation(i64),
    Offer(i64),
}

impl Owner {
    pub fn id(self) -> i64 {
        match self {
            Owner::Calculation(id) | Owner::Offer(id) => id,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Owner::Calculation(_) => "calculation_id",
            Owner::Offer(_) => "offer_id",
        }
    }

    pub fn garment_table(self) -> &'static str {
        match self {
            Owner::Calculation(_) => "garment_data",
            Owner::Offer(_) => "garment_offer_data",
        }
    }

    pub fn warehousing_table(self) -> &'static str {
        match self {
            Owner::Calculation(_) => "warehousing_data",
            Owner::Offer(_) => "warehousing_offer_data",
        }
    }
}

/// item number as stored: explicit, or the 1-based list position
fn item_number(idx: usize, item: &GarmentItemInput) -> i64 {
    item.item_number.unwrap_or(idx as i64 + 1)
}

pub fn validate_items(items: &[GarmentItemInput]) -> ServiceResult<()> {
    if items.len() > MAX_ITEMS {
        return Err(ServiceError::validation(format!(
            "at most {} items allowed, got {}",
            MAX_ITEMS,
            items.len()
        )));
    }
    for (idx, item) in items.iter().enumerate() {
        let n = item_number(idx, item);
        if n < 1 {
            return Err(ServiceError::validation(format!(
                "item numbers start at 1, got {}",
                n
            )));
        }
    }
    Ok(())
}

pub fn insert_garment_items(db: &Database, owner: Owner, items: &[GarmentItemInput]) -> Result<()> {
    let columns = once(owner.column())
        .chain(once("item_number"))
        .chain(GarmentCosts::columns().iter().copied());
    let stmt = db.prepare(&insert_statement(owner.garment_table(), columns));
    for (idx, item) in items.iter().enumerate() {
        let values = once(Value::from(owner.id()))
            .chain(once(Value::from(item_number(idx, item))))
            .chain(item.costs.normalize().values())
            .collect::<Vec<_>>();
        stmt.run(&values)?;
    }
    trace!(?owner, items = items.len(), "garment items stored");
    Ok(())
}

pub fn insert_warehousing(db: &Database, owner: Owner, input: &WarehousingInput) -> Result<()> {
    let columns = once(owner.column()).chain(Warehousing::columns().iter().copied());
    let values = once(Value::from(owner.id()))
        .chain(input.normalize().values())
        .collect::<Vec<_>>();
    db.prepare(&insert_statement(owner.warehousing_table(), columns))
        .run(&values)?;
    Ok(())
}

pub fn garment_items(db: &Database, owner: Owner) -> Result<Vec<GarmentItem>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ? ORDER BY item_number ASC",
        owner.garment_table(),
        owner.column()
    );
    db.prepare(&sql)
        .all(params![owner.id()])?
        .into_iter()
        .map(decode)
        .collect()
}

pub fn warehousing(db: &Database, owner: Owner) -> Result<Option<Warehousing>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?",
        owner.warehousing_table(),
        owner.column()
    );
    db.prepare(&sql).get(params![owner.id()])?.map(decode).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch;
    use serde_json::json;

    fn item(n: Option<i64>, fob: &str) -> GarmentItemInput {
        serde_json::from_value(json!({ "item_number": n, "fob_preis_usd": fob, "style": "Mantel" }))
            .unwrap()
    }

    #[test]
    fn must_store_items_per_owner() {
        let (_dir, db) = scratch();
        insert_garment_items(&db, Owner::Calculation(1), &[item(Some(2), "1.234,56"), item(Some(1), "3,5")])
            .unwrap();
        insert_garment_items(&db, Owner::Offer(1), &[item(None, "9")]).unwrap();

        let items = garment_items(&db, Owner::Calculation(1)).unwrap();
        let numbers = items.iter().map(|i| i.item_number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(items[1].costs.fob_preis_usd, Some(1234.56));
        assert_eq!(items[0].costs.style.as_deref(), Some("Mantel"));

        let offer_items = garment_items(&db, Owner::Offer(1)).unwrap();
        assert_eq!(offer_items.len(), 1);
        assert_eq!(offer_items[0].item_number, 1);
        assert!(garment_items(&db, Owner::Calculation(2)).unwrap().is_empty());
    }

    #[test]
    fn must_store_warehousing() {
        let (_dir, db) = scratch();
        let input: WarehousingInput = serde_json::from_value(json!({
            "handling_in_entladung": "2,50",
            "kartonage1_text": "Karton groß",
            "kartonage1_wert": "1,20"
        }))
        .unwrap();
        insert_warehousing(&db, Owner::Calculation(4), &input).unwrap();

        let stored = warehousing(&db, Owner::Calculation(4)).unwrap().unwrap();
        assert_eq!(stored.handling_in_entladung, Some(2.5));
        assert_eq!(stored.kartonage1_wert, Some(1.2));
        assert_eq!(stored.kartonage1_text.as_deref(), Some("Karton groß"));
        assert_eq!(stored.preis_m2, None);
        assert_eq!(warehousing(&db, Owner::Offer(4)).unwrap(), None);
    }

    #[test]
    fn must_validate_items() {
        assert!(validate_items(&vec![item(None, "1"); MAX_ITEMS]).is_ok());
        assert!(matches!(
            validate_items(&vec![item(None, "1"); MAX_ITEMS + 1]),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            validate_items(&[item(Some(0), "1")]),
            Err(ServiceError::Validation(_))
        ));
    }
}
