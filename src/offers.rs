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
//! Offers: frozen snapshots of a calculation, addressed to a customer
//!
//! An offer copies its line items into the offer-side child tables at creation time and
//! never follows later edits of the source calculation. Sending goes through a
//! [`Mailer`](trait.Mailer.html), the transport itself lives outside this crate.

use crate::{
    activity::ActivityLog,
    db::{decode, Database},
    error::{ServiceError, ServiceResult},
    line_items::{self, Owner},
    model::{Action, AuthUser, CalculationType, Offer, OfferDetail, OfferInput},
    offer_number::OfferNumbers,
    params,
};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub content_base64: String,
}

/// A ready-to-send offer mail
#[derive(Clone, Debug, PartialEq)]
pub struct OfferMail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachment: Option<Attachment>,
}

/// Delivery of offer mails, e.g. via SMTP
pub trait Mailer {
    fn send(&self, mail: &OfferMail) -> Result<()>;
}

/// What the caller may override when sending
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// rendered PDF of the offer
    #[serde(default)]
    pub pdf_base64: Option<String>,
}

/// Sender identity used in subjects and the default message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Letterhead {
    pub company_name: String,
    pub signature: String,
}

impl Default for Letterhead {
    fn default() -> Self {
        Self {
            company_name: "Fashion Holding Düsseldorf".to_owned(),
            signature: "Fashion Holding Düsseldorf GmbH".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SavedOffer {
    pub id: i64,
    pub offer_uuid: String,
    pub offer_number: String,
}

pub struct Offers<'db> {
    db: &'db Database,
    numbers: OfferNumbers<'db>,
    log: ActivityLog<'db>,
    letterhead: Letterhead,
}

impl<'db> Offers<'db> {
    pub fn new(db: &'db Database, offer_prefix: &str, letterhead: Letterhead) -> Self {
        Self {
            db,
            numbers: OfferNumbers::new(db, offer_prefix),
            log: ActivityLog::new(db),
            letterhead,
        }
    }

    #[instrument(skip(self, input, user), fields(kunde = ?input.kunde))]
    pub fn create_offer(&self, input: &OfferInput, user: &AuthUser) -> ServiceResult<SavedOffer> {
        line_items::validate_items(&input.items)?;
        let uuid = Uuid::new_v4().to_string();
        let number = self.numbers.allocate(1)?.to_string();
        let snapshot = input.snapshot_data.as_ref().map(|s| s.to_string());

        let exec = self
            .db
            .prepare(
                "INSERT INTO offers (
                   offer_uuid, offer_type, source_calculation_id, kunde, customer_name,
                   customer_company, customer_street, customer_postal_code, customer_city,
                   customer_country, customer_email, customer_phone, created_by,
                   valid_until, status, notes, message, delivery_option, snapshot_data,
                   offer_number, created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
            )
            .run(params![
                uuid.as_str(),
                input.offer_type.as_str(),
                input.source_calculation_id,
                non_empty(&input.kunde),
                non_empty(&input.customer_name),
                non_empty(&input.customer_company),
                non_empty(&input.customer_street),
                non_empty(&input.customer_postal_code),
                non_empty(&input.customer_city),
                non_empty(&input.customer_country),
                non_empty(&input.customer_email),
                non_empty(&input.customer_phone),
                user.id.as_str(),
                non_empty(&input.valid_until),
                input.status.unwrap_or_default().as_str(),
                non_empty(&input.notes),
                non_empty(&input.message),
                non_empty(&input.delivery_option),
                snapshot,
                number.as_str()
            ])?;
        let id = exec
            .last_insert_rowid()
            .ok_or_else(|| anyhow!("store did not allocate an id"))?;

        let owner = Owner::Offer(id);
        match (input.offer_type, &input.warehousing) {
            (CalculationType::Garment, _) if !input.items.is_empty() => {
                line_items::insert_garment_items(self.db, owner, &input.items)?
            }
            (CalculationType::Warehousing, Some(wh)) => line_items::insert_warehousing(self.db, owner, wh)?,
            _ => {}
        }

        self.log.record(
            Action::Create,
            "offer",
            Some(id),
            Some(uuid.as_str()),
            user,
            Some(json!({ "kunde": input.kunde, "offer_type": input.offer_type.as_str() })),
        );
        info!(id, %number, "offer created");
        Ok(SavedOffer {
            id,
            offer_uuid: uuid,
            offer_number: number,
        })
    }

    /// Non-deleted offers, newest first, with the creator's name
    pub fn list_offers(&self) -> ServiceResult<Vec<Offer>> {
        let rows = self
            .db
            .prepare(
                "SELECT o.*, u.name as created_by_name
                 FROM offers o
                 LEFT JOIN users u ON o.created_by = u.id
                 WHERE o.deleted_at IS NULL
                 ORDER BY o.id DESC",
            )
            .all(params![])?;
        Ok(rows.into_iter().map(decode).collect::<Result<_>>()?)
    }

    #[instrument(skip(self))]
    pub fn get_offer(&self, id: i64) -> ServiceResult<OfferDetail> {
        let mut offer = self.require(id)?;
        if offer.offer_number.as_deref().map(str::is_empty).unwrap_or(true) {
            let number = self.numbers.allocate(1)?.to_string();
            self.db
                .prepare("UPDATE offers SET offer_number = ? WHERE id = ?")
                .run(params![number.as_str(), id])?;
            debug!(id, %number, "offer number backfilled");
            offer.offer_number = Some(number);
        }
        let owner = Owner::Offer(id);
        let (items, warehousing) = match offer.offer_type {
            CalculationType::Garment => (line_items::garment_items(self.db, owner)?, None),
            CalculationType::Warehousing => (vec![], line_items::warehousing(self.db, owner)?),
        };
        Ok(OfferDetail {
            offer,
            items,
            warehousing,
        })
    }

    /// Soft delete
    #[instrument(skip(self, user))]
    pub fn delete_offer(&self, id: i64, user: &AuthUser) -> ServiceResult<()> {
        let offer = self.require(id)?;
        let exec = self
            .db
            .prepare("UPDATE offers SET deleted_at = datetime('now') WHERE id = ? AND deleted_at IS NULL")
            .run(params![id])?;
        if exec.changes > 0 {
            self.log.record(
                Action::Delete,
                "offer",
                Some(id),
                Some(offer.offer_uuid.as_str()),
                user,
                Some(json!({ "kunde": offer.kunde, "offer_type": offer.offer_type.as_str() })),
            );
        }
        Ok(())
    }

    /// Compose the offer mail, hand it to the mailer and mark the offer as sent
    ///
    /// Nothing is written when the mailer fails.
    #[instrument(skip(self, request, mailer, user))]
    pub fn send_offer(
        &self,
        id: i64,
        request: &SendRequest,
        mailer: &dyn Mailer,
        user: &AuthUser,
    ) -> ServiceResult<String> {
        let offer = self.require(id)?;
        let mail = self.compose(&offer, request)?;
        mailer.send(&mail)?;

        self.db
            .prepare("UPDATE offers SET status = 'sent', sent_at = datetime('now') WHERE id = ?")
            .run(params![id])?;
        self.log.record(
            Action::SendEmail,
            "offer",
            Some(id),
            Some(offer.offer_uuid.as_str()),
            user,
            Some(json!({ "kunde": offer.kunde, "recipient": mail.to })),
        );
        info!(id, recipient = %mail.to, "offer sent");
        Ok(mail.to)
    }

    fn compose(&self, offer: &Offer, request: &SendRequest) -> ServiceResult<OfferMail> {
        let to = non_empty(&request.recipient)
            .or_else(|| non_empty(&offer.customer_email))
            .ok_or_else(|| ServiceError::validation("no recipient email address"))?
            .to_owned();
        let reference = offer.reference();
        let subject = non_empty(&request.subject)
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Angebot von {} - {}", self.letterhead.company_name, reference));
        let text = non_empty(&request.message)
            .or_else(|| non_empty(&offer.message))
            .map(str::to_owned)
            .unwrap_or_else(|| self.default_message(offer.addressee()));
        let attachment = non_empty(&request.pdf_base64).map(|pdf| Attachment {
            filename: format!("Angebot_{}.pdf", reference),
            content_base64: pdf.to_owned(),
        });
        Ok(OfferMail {
            to,
            subject,
            html: to_html(&text),
            text,
            attachment,
        })
    }

    fn default_message(&self, addressee: &str) -> String {
        format!(
            "Sehr geehrte/r {},\n\n\
             anbei erhalten Sie unser Angebot wie besprochen.\n\n\
             Bei Rückfragen stehen wir Ihnen gerne zur Verfügung.\n\n\
             Mit freundlichen Grüßen,\n\
             {}",
            addressee, self.letterhead.signature
        )
    }

    fn require(&self, id: i64) -> ServiceResult<Offer> {
        let row = self
            .db
            .prepare("SELECT * FROM offers WHERE id = ?")
            .get(params![id])?
            .ok_or_else(|| ServiceError::not_found(format!("offer {}", id)))?;
        Ok(decode(row)?)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn escape(line: &str) -> String {
    line.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// one paragraph per line, empty lines kept as spacing
fn to_html(text: &str) -> String {
    let paragraphs = text
        .split('\n')
        .map(|line| {
            let line = if line.is_empty() {
                "&nbsp;".to_owned()
            } else {
                escape(line)
            };
            format!("<p style=\"margin: 0 0 10px 0;\">{}</p>", line)
        })
        .collect::<String>();
    format!(
        "<div style=\"font-family: Arial, sans-serif; line-height: 1.6;\">{}</div>",
        paragraphs
    )
}
