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
//! Typed records for every table, plus the shapes callers hand in
//!
//! Stored rows are read leniently: files written by earlier versions keep flags as
//! `0`/`1`, ids as numbers or strings, and the activity details as embedded JSON text.

use crate::decimal::DecimalInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationType {
    Garment,
    Warehousing,
}

impl CalculationType {
    pub fn as_str(self) -> &'static str {
        match self {
            CalculationType::Garment => "garment",
            CalculationType::Warehousing => "warehousing",
        }
    }
}

impl Default for CalculationType {
    fn default() -> Self {
        CalculationType::Garment
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Sent,
    Accepted,
    Rejected,
    Expired,
}

impl OfferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Sent => "sent",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Expired => "expired",
        }
    }
}

impl Default for OfferStatus {
    fn default() -> Self {
        OfferStatus::Pending
    }
}

/// What an activity log entry records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Create,
    Update,
    Delete,
    SendEmail,
    Export,
    AdminAccess,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "CREATE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::SendEmail => "SEND_EMAIL",
            Action::Export => "EXPORT",
            Action::AdminAccess => "ADMIN_ACCESS",
        }
    }
}

/// The already authenticated caller, used for attribution and role checks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "lenient::id")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub active: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl User {
    pub fn auth(&self) -> AuthUser {
        AuthUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
        }
    }
}

fn first_version() -> i64 {
    1
}

/// One row of the `calculations` table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub calculation_uuid: String,
    #[serde(default = "first_version", deserialize_with = "lenient::version")]
    pub version: i64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub kunde: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub created_by: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub calculation_type: CalculationType,
    #[serde(default, deserialize_with = "lenient::text")]
    pub offer_number: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_current: bool,
    #[serde(default)]
    pub parent_version_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
    /// filled in by queries joining `users`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_name: Option<String>,
}

/// A calculation with its line items or warehousing prices
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalculationDetail {
    #[serde(flatten)]
    pub calculation: Calculation,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<GarmentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehousing: Option<Warehousing>,
}

/// One entry of a calculation's version history
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VersionInfo {
    pub id: i64,
    pub calculation_uuid: String,
    pub version: i64,
    pub changed_at: Option<String>,
    pub changed_by: String,
    pub change_description: String,
    pub is_current: bool,
}

/// One row of the `offers` table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub offer_uuid: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub offer_type: CalculationType,
    #[serde(default)]
    pub source_calculation_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub kunde: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_company: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_street: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_postal_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_city: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_country: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_email: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_phone: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub valid_until: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub status: OfferStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub delivery_option: Option<String>,
    #[serde(default, deserialize_with = "lenient::json_text")]
    pub snapshot_data: Option<Value>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub offer_number: Option<String>,
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_name: Option<String>,
}

impl Offer {
    /// how the customer is addressed in mails
    pub fn addressee(&self) -> &str {
        self.customer_name
            .as_deref()
            .or_else(|| self.customer_company.as_deref())
            .or_else(|| self.kunde.as_deref())
            .unwrap_or("Kunde")
    }

    /// offer number, or the numeric id for rows that never got one
    pub fn reference(&self) -> String {
        self.offer_number
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OfferDetail {
    #[serde(flatten)]
    pub offer: Offer,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<GarmentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warehousing: Option<Warehousing>,
}

/// One row of `calculation_logs`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub action: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub entity_uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::json_text")]
    pub details: Option<Value>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A column set stored in a child table, either under a calculation or under an offer
pub trait DbRecord {
    /// content columns, without the owner reference
    fn columns() -> &'static [&'static str];
    /// values in the order of `columns()`
    fn values(&self) -> Vec<Value>;
}

/// Declares a cost sheet twice: as stored (floats) and as typed in (German decimals)
macro_rules! cost_sheet {
    (
        $(#[$meta:meta])*
        $name:ident / $input:ident {
            numeric: [$($num:ident),* $(,)?],
            text: [$($txt:ident),* $(,)?] $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $(
                #[serde(default, deserialize_with = "lenient::number")]
                pub $num: Option<f64>,
            )*
            $(
                #[serde(default, deserialize_with = "lenient::text")]
                pub $txt: Option<String>,
            )*
        }

        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        pub struct $input {
            $(
                #[serde(default)]
                pub $num: Option<DecimalInput>,
            )*
            $(
                #[serde(default)]
                pub $txt: Option<String>,
            )*
        }

        impl $input {
            /// parse the German decimals, empty text becomes `None`
            pub fn normalize(&self) -> $name {
                $name {
                    $($num: self.$num.as_ref().and_then(DecimalInput::value),)*
                    $($txt: self.$txt.clone().filter(|s| !s.trim().is_empty()),)*
                }
            }
        }

        impl DbRecord for $name {
            fn columns() -> &'static [&'static str] {
                &[$(stringify!($num),)* $(stringify!($txt),)*]
            }

            fn values(&self) -> Vec<Value> {
                vec![$(Value::from(self.$num),)* $(Value::from(self.$txt.clone()),)*]
            }
        }
    };
}

cost_sheet! {
    /// Import costing of one garment
    GarmentCosts / GarmentCostsInput {
        numeric: [
            fob_preis_usd, kurs, fob_preis_eur, fracht, zoll_prozent, zoll, aufbereitung,
            selbstkosten, fhd_aufschlag_prozent, fhd_aufschlag_wert, vk_roh, vk_gesetzt,
            provision_agent_prozent, provision_agent_wert, marge_real, luftfrachtzuschlag,
        ],
        text: [
            style, composition, gg, material, lieferung, lieferant, lieferzeit,
            produktionszeitraum, frachtzeitraum, bemerkungen,
        ],
    }
}

cost_sheet! {
    /// Per-unit, per-hour and per-area warehousing service prices
    Warehousing / WarehousingInput {
        numeric: [
            handling_in_entladung, lagerplatz_verbringen, kommissionierung_b2b,
            kommissionierung_b2c, zusatzarbeiten_stunden, handling_out, anmeldung_avisierung,
            lieferscheintasche, kartonage1_wert, kartonage2_wert, kartonage3_wert,
            annahme_entsorgung, grobsichtung, einhuellen_polybag, rueckfuehrung_bestand,
            flaeche_m2, preis_m2, inventur_stunden, etiketten_drucken_stunden,
            etikettierung_stunden,
        ],
        text: [kartonage1_text, kartonage2_text, kartonage3_text, bemerkungen],
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GarmentItem {
    pub item_number: i64,
    #[serde(flatten)]
    pub costs: GarmentCosts,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GarmentItemInput {
    /// 1-based position, taken from the list position when absent
    #[serde(default)]
    pub item_number: Option<i64>,
    #[serde(flatten)]
    pub costs: GarmentCostsInput,
}

/// Content of a calculation as submitted for create or update
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationInput {
    #[serde(default)]
    pub kunde: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub calculation_type: CalculationType,
    #[serde(default)]
    pub items: Vec<GarmentItemInput>,
    #[serde(default)]
    pub warehousing: Option<WarehousingInput>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OfferInput {
    #[serde(default)]
    pub offer_type: CalculationType,
    #[serde(default)]
    pub source_calculation_id: Option<i64>,
    #[serde(default)]
    pub kunde: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_company: Option<String>,
    #[serde(default)]
    pub customer_street: Option<String>,
    #[serde(default)]
    pub customer_postal_code: Option<String>,
    #[serde(default)]
    pub customer_city: Option<String>,
    #[serde(default)]
    pub customer_country: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub status: Option<OfferStatus>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub delivery_option: Option<String>,
    #[serde(default)]
    pub snapshot_data: Option<Value>,
    #[serde(default)]
    pub items: Vec<GarmentItemInput>,
    #[serde(default)]
    pub warehousing: Option<WarehousingInput>,
}

/// Deserializers accepting the value shapes found in older data files
pub(crate) mod lenient {
    use serde::{de::Error, Deserialize, Deserializer};
    use serde_json::Value;

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
            Value::String(s) => s == "1" || s.eq_ignore_ascii_case("true"),
            _ => false,
        })
    }

    /// explicit `null` reads like a missing field
    pub fn or_default<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
    }

    pub fn version<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .unwrap_or(1))
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match text(d)? {
            Some(s) => Ok(s),
            None => Err(D::Error::custom("missing id")),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            other => Some(other.to_string()),
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => crate::decimal::parse_german(&s),
            _ => None,
        })
    }

    /// JSON kept as text in the row, parsed on the way out
    pub fn json_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Value>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            Value::String(s) => Some(serde_json::from_str(&s).unwrap_or(Value::String(s))),
            other => Some(other),
        })
    }
}
