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
//! Versioned sales price calculations and offers for a fashion agency
//!
//! All data lives in one JSON document (a file, or a single row of an SQLite table) and is
//! accessed through a small SQL interpreter, so the services read like ordinary SQL code:
//!
//! ```no_run
//! use fhd_calc_store::{calculations::Calculations, db::Database, model::{AuthUser, CalculationInput}};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let db = Database::open_json("data/database.json")?;
//! let user = AuthUser { id: "u1".into(), name: "Anna".into(), email: "anna@fhd.agency".into(), role: "user".into() };
//! let calcs = Calculations::new(&db, "FHD");
//!
//! let input: CalculationInput = serde_json::from_value(json!({
//!     "kunde": "Acme",
//!     "items": [{ "fob_preis_usd": "1.234,56" }],
//! }))?;
//! let v1 = calcs.create(&input, &user)?;
//! let v2 = calcs.update(v1.id, &input, &user)?;
//! assert_eq!(v2.version, 2);
//! # Ok(())
//! # }
//! ```
//!
//! Each save of a calculation appends a new version to its chain; every version carries an
//! offer number `PREFIX<year>-<counter>.<version>` whose base stays fixed for the chain.
//! Every mutation is recorded in the activity log, which admins can page through or export
//! together with the rest of the database.

pub mod activity;
pub mod admin;
pub mod calculations;
pub mod config;
pub mod db;
pub mod decimal;
pub mod error;
pub mod line_items;
pub mod model;
pub mod offer_number;
pub mod offers;
pub mod users;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use db::Database;
pub use error::{ServiceError, ServiceResult};
