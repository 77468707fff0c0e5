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
//! Human readable offer numbers like `FHD2025-0042.3`
//!
//! The part before the last dot (`FHD2025-0042`) is allocated once per calculation or
//! offer from a per-year counter; the suffix is the version and changes with every edit.

use crate::db::Database;
use anyhow::Result;
use chrono::{Datelike, Utc};
use derive_more::Display;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, instrument};

pub const DEFAULT_PREFIX: &str = "FHD";

#[derive(Clone, Debug, PartialEq, Eq, Display)]
#[display(fmt = "{}.{}", base, version)]
pub struct OfferNumber {
    base: String,
    version: i64,
}

#[derive(Debug, Error, PartialEq)]
#[error("malformed offer number {0:?}")]
pub struct MalformedOfferNumber(String);

impl OfferNumber {
    pub fn new(base: impl Into<String>, version: i64) -> Self {
        Self {
            base: base.into(),
            version,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// same base, different suffix
    pub fn with_version(&self, version: i64) -> Self {
        Self::new(self.base.clone(), version)
    }

    /// Re-suffix a stored number: the base is everything before the last `.`, or the
    /// whole text when it has no dot
    pub fn rebase(stored: &str, version: i64) -> Self {
        match stored.rsplit_once('.') {
            Some((base, _)) if !base.is_empty() => Self::new(base, version),
            _ => Self::new(stored, version),
        }
    }
}

impl FromStr for OfferNumber {
    type Err = MalformedOfferNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedOfferNumber(s.to_owned());
        let (base, version) = s.rsplit_once('.').ok_or_else(malformed)?;
        let version = version.parse::<i64>().map_err(|_| malformed())?;
        if base.is_empty() {
            return Err(malformed());
        }
        Ok(Self::new(base, version))
    }
}

/// Allocates offer numbers from the per-year counters in `counters_table`
pub struct OfferNumbers<'db> {
    db: &'db Database,
    prefix: String,
}

impl<'db> OfferNumbers<'db> {
    pub fn new(db: &'db Database, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    /// fresh number for the current calendar year
    pub fn allocate(&self, version: i64) -> Result<OfferNumber> {
        self.allocate_for_year(Utc::now().year(), version)
    }

    /// Fresh number for the given year
    ///
    /// Every call consumes one counter value, whether the number is used or not.
    #[instrument(skip(self), level = "debug")]
    pub fn allocate_for_year(&self, year: i32, version: i64) -> Result<OfferNumber> {
        let counter = self.db.bump_counter(&counter_key(year))?;
        let number = OfferNumber::new(format!("{}{}-{:04}", self.prefix, year, counter), version);
        debug!(%number, "allocated");
        Ok(number)
    }
}

pub fn counter_key(year: i32) -> String {
    format!("offer_number_{}", year)
}
