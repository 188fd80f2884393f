//! Checks a recipient's submitted field values and records them.

use std::collections::HashSet;
use std::net::IpAddr;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use crate::completion::SubmitOutcome;
use crate::error::{Error, Rejection, Result};
use crate::models::{Document, Placement, Recipient, Signature, SignatureValue};
use crate::schema::RecipientStatus;
use crate::service::Esign;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedEntry {
    pub placement_id: uuid::Uuid,
    /// PNG image, either as a `data:image/png;base64,` URL or bare base64.
    #[serde(default)]
    pub signature_data: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub signatures: Vec<SubmittedEntry>,
}

fn decode_image(placement: uuid::Uuid, data: &str) -> Result<Vec<u8>, Rejection> {
    let data = data.trim();
    let payload = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or(Rejection::InvalidImage(placement))?;
            if !header.eq_ignore_ascii_case("image/png;base64") {
                return Err(Rejection::InvalidImage(placement));
            }
            payload
        }
        None => data,
    };
    if payload.is_empty() {
        return Err(Rejection::EmptyValue(placement));
    }

    let bytes = base64::decode(payload).map_err(|_| Rejection::InvalidImage(placement))?;
    crate::pdf::decode_png(&bytes).map_err(|_| Rejection::InvalidImage(placement))?;
    Ok(bytes)
}

fn normalise(placement: &Placement, entry: SubmittedEntry) -> Result<SignatureValue, Rejection> {
    let id = placement.id;
    if placement.field_type.takes_image() {
        match (entry.signature_data, entry.value) {
            (_, Some(_)) => Err(Rejection::PayloadMismatch { placement: id, expected: "an image" }),
            (Some(data), None) => Ok(SignatureValue::Image(decode_image(id, &data)?)),
            (None, None) => Err(Rejection::EmptyValue(id)),
        }
    } else {
        match (entry.signature_data, entry.value) {
            (Some(_), _) => Err(Rejection::PayloadMismatch { placement: id, expected: "a text value" }),
            (None, Some(value)) if !value.trim().is_empty() => Ok(SignatureValue::Text(value.trim().to_string())),
            (None, _) => Err(Rejection::EmptyValue(id)),
        }
    }
}

/// Turns a submission into signature rows, or explains why it is refused.
/// `catalog` is the document's placement list in catalog order.
pub fn validate_submission(
    recipient: &Recipient, document: &Document, catalog: &[Placement], entries: Vec<SubmittedEntry>,
    now: DateTime<Utc>,
) -> Result<Vec<Signature>> {
    let mut seen = HashSet::new();
    let mut matched = Vec::with_capacity(entries.len());
    for entry in entries {
        let placement = catalog.iter()
            .find(|p| p.id == entry.placement_id)
            .ok_or(Error::NotFound("placement"))?;
        if placement.recipient_role != recipient.role {
            return Err(Rejection::ForeignPlacement(placement.id).into());
        }
        if !seen.insert(placement.id) {
            return Err(Rejection::DuplicateEntry(placement.id).into());
        }
        matched.push((placement, entry));
    }

    if let Some(missing) = catalog.iter()
        .filter(|p| p.required && p.recipient_role == recipient.role)
        .find(|p| !seen.contains(&p.id)) {
        return Err(Error::MissingRequiredField(missing.display_name()));
    }

    matched.into_iter().map(|(placement, entry)| -> Result<Signature> {
        Ok(Signature {
            id: uuid::Uuid::new_v4(),
            document_id: document.id,
            recipient_id: recipient.id,
            placement_id: placement.id,
            value: normalise(placement, entry)?,
            created_at: now,
        })
    }).collect()
}

impl Esign {
    /// Records every field of one recipient in a single write and completes
    /// the document if they were the last to sign.
    pub async fn submit_signatures(
        &self, token: &str, entries: Vec<SubmittedEntry>, client_ip: Option<IpAddr>,
    ) -> Result<SubmitOutcome> {
        let now = Utc::now();
        let (recipient, document) = self.open_session(token, now).await?;
        recipient.status.advance(RecipientStatus::Completed)?;

        let catalog = self.catalog_for(&document).await?;
        let signatures = validate_submission(&recipient, &document, &catalog, entries, now)?;
        let count = signatures.len();

        let ip = crate::session::client_net(client_ip);
        if !self.store.record_signatures(recipient.id, signatures, now, ip).await? {
            return Err(Error::AlreadyCompleted);
        }
        info!("Recipient {} signed {} field(s) on document {}", recipient.id, count, document.id);

        self.detect_completion(document.id).await
    }
}
