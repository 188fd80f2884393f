//! The recipients of a document, created as one batch when it is sent.

use rand::Rng;
use serde::Deserialize;
use crate::error::{Error, Rejection, Result};
use crate::models::Recipient;
use crate::schema::{DocumentStatus, RecipientStatus};
use crate::service::Esign;

pub const DEFAULT_ROLE: &str = "signer";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecipient {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub signing_order: Option<i32>,
}

pub fn make_recipient_key() -> String {
    base64::encode_config(
        rand::thread_rng()
            .sample_iter(rand::distributions::Standard)
            .take(64)
            .collect::<Vec<u8>>(),
        base64::URL_SAFE_NO_PAD,
    )
}

/// Turns the sender's list into recipient rows, each with a fresh access
/// token. Signing order defaults to the position in the list.
pub fn build_batch(document_id: uuid::Uuid, recipients: Vec<NewRecipient>) -> Result<Vec<Recipient>> {
    recipients.into_iter().enumerate().map(|(index, r)| -> Result<Recipient> {
        let name = r.name.trim();
        if name.is_empty() {
            return Err(Rejection::InvalidRecipient { index, reason: "name is required" }.into());
        }
        let email = r.email.trim();
        if email.parse::<lettre::Address>().is_err() {
            return Err(Rejection::InvalidRecipient { index, reason: "email address is invalid" }.into());
        }
        let role = match r.role.as_deref().map(str::trim) {
            Some(role) if !role.is_empty() => role.to_string(),
            _ => DEFAULT_ROLE.to_string(),
        };

        Ok(Recipient {
            id: uuid::Uuid::new_v4(),
            document_id,
            name: name.to_string(),
            email: email.to_string(),
            role,
            signing_order: r.signing_order.unwrap_or(index as i32 + 1),
            access_token: make_recipient_key(),
            status: RecipientStatus::Pending,
            viewed_at: None,
            signed_at: None,
            ip_address: None,
        })
    }).collect()
}

impl Esign {
    /// Sends the signing request email to one recipient again.
    pub async fn remind_recipient(
        &self, sender: uuid::Uuid, document_id: uuid::Uuid, recipient_id: uuid::Uuid,
    ) -> Result<()> {
        let document = self.owned_document(sender, document_id).await?;
        let recipient = self.store.recipients(document_id).await?
            .into_iter()
            .find(|r| r.id == recipient_id)
            .ok_or(Error::NotFound("recipient"))?;

        if recipient.status == RecipientStatus::Completed {
            return Err(Error::AlreadyCompleted);
        }
        if document.status != DocumentStatus::Sent {
            return Err(Error::InvalidTransition { from: document.status, to: DocumentStatus::Sent });
        }
        if document.is_expired(chrono::Utc::now()) {
            return Err(Error::Expired);
        }

        if let Err(err) = self.notifier.reminder(&document, &recipient, &self.signing_url(&recipient)).await {
            warn!("Unable to send reminder to {} for {}: {}", recipient.email, document.id, err);
        }
        Ok(())
    }
}
