//! A recipient's access to a document through their token.

use std::net::IpAddr;
use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::error::{Error, Result};
use crate::models::{Document, Placement, Recipient};
use crate::schema::{DocumentStatus, FieldType, RecipientStatus};
use crate::service::Esign;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub id: uuid::Uuid,
    pub title: String,
    pub message: Option<String>,
    pub status: DocumentStatus,
    pub file_url: String,
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecipient {
    pub id: uuid::Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: RecipientStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingSignature {
    pub id: uuid::Uuid,
    pub placement_id: uuid::Uuid,
    pub field_type: Option<FieldType>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub document: SessionDocument,
    pub recipient: SessionRecipient,
    pub placements: Vec<Placement>,
    pub existing_signatures: Vec<ExistingSignature>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub recipient_status: RecipientStatus,
    pub document_status: DocumentStatus,
}

pub(crate) fn client_net(ip: Option<IpAddr>) -> Option<ipnetwork::IpNetwork> {
    ip.map(ipnetwork::IpNetwork::from)
}

impl Esign {
    /// Looks the token up and checks that the recipient may still act on the
    /// document. Nothing is written.
    pub(crate) async fn open_session(&self, token: &str, now: DateTime<Utc>) -> Result<(Recipient, Document)> {
        let recipient = self.store.recipient_by_token(token).await?
            .ok_or(Error::NotFound("recipient"))?;
        if recipient.status == RecipientStatus::Completed {
            return Err(Error::AlreadyCompleted);
        }
        let document = self.store.document(recipient.document_id).await?
            .ok_or(Error::NotFound("document"))?;
        if document.is_expired(now) {
            return Err(Error::Expired);
        }
        match document.status {
            DocumentStatus::Voided => Err(Error::Voided),
            DocumentStatus::Completed => Err(Error::AlreadyCompleted),
            DocumentStatus::Draft => Err(Error::NotFound("document")),
            DocumentStatus::Expired => Err(Error::Expired),
            DocumentStatus::Sent => Ok((recipient, document)),
        }
    }

    /// Opens the signing page for a recipient, stamping the first view.
    pub async fn resolve_session(&self, token: &str, client_ip: Option<IpAddr>) -> Result<SessionView> {
        let now = Utc::now();
        let (recipient, document) = self.open_session(token, now).await?;

        let recipient = if recipient.status.can_advance(RecipientStatus::Viewed) {
            if self.store.mark_viewed(recipient.id, now, client_net(client_ip)).await? {
                debug!("Recipient {} viewed document {}", recipient.id, document.id);
            }
            self.store.recipient_by_token(token).await?
                .ok_or(Error::NotFound("recipient"))?
        } else {
            recipient
        };

        let placements = self.catalog_for(&document).await?;
        let existing_signatures = self.store.recipient_signatures(recipient.id).await?
            .into_iter()
            .map(|s| ExistingSignature {
                id: s.id,
                placement_id: s.placement_id,
                field_type: placements.iter().find(|p| p.id == s.placement_id).map(|p| p.field_type),
            })
            .collect();

        Ok(SessionView {
            document: SessionDocument {
                id: document.id,
                title: document.title.clone(),
                message: document.message.clone(),
                status: document.effective_status(now),
                file_url: self.file_url(&document.original_file),
                expiration_date: document.expiration_date,
            },
            recipient: SessionRecipient {
                id: recipient.id,
                name: recipient.name,
                email: recipient.email,
                role: recipient.role,
                status: recipient.status,
            },
            placements,
            existing_signatures,
        })
    }

    pub async fn session_status(&self, token: &str) -> Result<SessionStatus> {
        let recipient = self.store.recipient_by_token(token).await?
            .ok_or(Error::NotFound("recipient"))?;
        let document = self.store.document(recipient.document_id).await?
            .ok_or(Error::NotFound("document"))?;
        Ok(SessionStatus {
            recipient_status: recipient.status,
            document_status: document.effective_status(Utc::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::testutil;

    async fn one_signer(h: &testutil::Harness) -> testutil::Seeded {
        testutil::seed(
            h, 1,
            vec![testutil::field(FieldType::Signature, 1, 100.0, "signer", true)],
            vec![testutil::signer("Ann", "ann@example.com", "signer")],
        ).await
    }

    #[tokio::test]
    async fn first_view_is_stamped_once() {
        let h = testutil::harness();
        let seeded = one_signer(&h).await;
        let token = seeded.token("ann@example.com");
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        let view = h.esign.resolve_session(&token, Some(ip)).await.unwrap();
        assert_eq!(view.recipient.status, RecipientStatus::Viewed);
        assert_eq!(view.placements, seeded.placements);
        assert!(view.existing_signatures.is_empty());
        assert!(view.document.file_url.contains("?key="));

        let first = h.store.recipient_by_token(&token).await.unwrap().unwrap();
        assert_eq!(first.ip_address.map(|n| n.ip()), Some(ip));

        h.esign.resolve_session(&token, None).await.unwrap();
        let second = h.store.recipient_by_token(&token).await.unwrap().unwrap();
        assert_eq!(first.viewed_at, second.viewed_at);
        assert_eq!(second.status, RecipientStatus::Viewed);
    }

    #[tokio::test]
    async fn unknown_token() {
        let h = testutil::harness();
        one_signer(&h).await;
        assert!(matches!(h.esign.resolve_session("nope", None).await, Err(Error::NotFound(_))));
        assert!(matches!(h.esign.session_status("nope").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn expired_session_changes_nothing() {
        let h = testutil::harness();
        let mut doc = testutil::draft_document(None);
        doc.expiration_date = Some(Utc::now() - chrono::Duration::hours(1));
        h.store.insert_document(doc.clone()).await.unwrap();
        let r = testutil::recipient(doc.id, "ann@example.com", "signer");
        assert!(h.store.send_document(doc.id, vec![r.clone()], Utc::now()).await.unwrap());

        assert!(matches!(h.esign.resolve_session(&r.access_token, None).await, Err(Error::Expired)));
        let after = h.store.recipient_by_token(&r.access_token).await.unwrap().unwrap();
        assert_eq!(after.status, RecipientStatus::Pending);
        assert!(after.viewed_at.is_none());

        let status = h.esign.session_status(&r.access_token).await.unwrap();
        assert_eq!(status, SessionStatus {
            recipient_status: RecipientStatus::Pending,
            document_status: DocumentStatus::Expired,
        });
        assert_eq!(h.store.document(doc.id).await.unwrap().unwrap().status, DocumentStatus::Sent);
    }

    #[tokio::test]
    async fn voided_session_is_closed() {
        let h = testutil::harness();
        let seeded = one_signer(&h).await;
        let token = seeded.token("ann@example.com");
        h.esign.void_document(seeded.document.sender_id, seeded.document.id).await.unwrap();

        assert!(matches!(h.esign.resolve_session(&token, None).await, Err(Error::Voided)));
        assert_eq!(h.esign.session_status(&token).await.unwrap().document_status, DocumentStatus::Voided);
    }
}
