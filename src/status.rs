//! Document lifecycle: `draft -> sent -> completed`, `draft|sent -> voided`,
//! and `sent -> expired` once the expiration date has passed.
//!
//! Expiry is never written back to storage; it is derived from the
//! expiration date whenever a document is looked at.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Rejection, Result};
use crate::models::{Document, Recipient};
use crate::schema::{DocumentStatus, RecipientStatus};
use crate::service::Esign;
use crate::store::Edit;

impl DocumentStatus {
    pub fn can_transition(self, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, to),
            (Draft, Sent) | (Sent, Completed) | (Draft, Voided) | (Sent, Voided) | (Sent, Expired)
        )
    }

    pub fn transition(self, to: DocumentStatus) -> Result<DocumentStatus> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::InvalidTransition { from: self, to })
        }
    }
}

impl RecipientStatus {
    fn rank(self) -> u8 {
        match self {
            RecipientStatus::Pending => 0,
            RecipientStatus::Viewed => 1,
            RecipientStatus::Completed => 2,
        }
    }

    pub fn can_advance(self, to: RecipientStatus) -> bool {
        to.rank() > self.rank()
    }

    pub fn advance(self, to: RecipientStatus) -> Result<RecipientStatus> {
        if self.can_advance(to) {
            Ok(to)
        } else {
            Err(Error::RecipientRegression { from: self, to })
        }
    }
}

impl Document {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration_date, Some(exp) if exp <= now)
    }

    /// The status a caller should see: a sent document past its expiration
    /// date reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> DocumentStatus {
        if self.status == DocumentStatus::Sent && self.is_expired(now) {
            DocumentStatus::Expired
        } else {
            self.status
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    #[serde(default)]
    pub template_id: Option<uuid::Uuid>,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub effective_status: DocumentStatus,
    pub recipients: Vec<Recipient>,
}

/// Changes to a draft. Absent fields are left alone; an empty message
/// clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChanges {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    #[serde(flatten)]
    pub document: Document,
    pub effective_status: DocumentStatus,
    pub recipient_count: usize,
    pub signed_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentRecipient {
    pub name: String,
    pub email: String,
}

impl Esign {
    /// Creates a draft from a template owned by the sender, or else from an
    /// uploaded PDF.
    pub async fn create_document(
        &self, sender: uuid::Uuid, new: NewDocument, upload: Option<Vec<u8>>,
    ) -> Result<Document> {
        let now = Utc::now();
        let title = new.title.trim();
        if title.is_empty() {
            return Err(Rejection::InvalidDocument("title is required").into());
        }
        if matches!(new.expiration_date, Some(exp) if exp <= now) {
            return Err(Rejection::InvalidDocument("expiration date is in the past").into());
        }

        let id = uuid::Uuid::new_v4();
        let original_file = format!("documents/{}/original.pdf", id);
        let pdf = match (new.template_id, upload) {
            (Some(template_id), _) => {
                let template = match self.store.template(template_id).await? {
                    Some(t) if t.owner_id == sender => t,
                    _ => return Err(Error::NotFound("template")),
                };
                self.blobs.get(&template.file).await?
            }
            (None, Some(upload)) => {
                match crate::pdf::page_count(&upload) {
                    Ok(p) if p > 0 => {}
                    _ => return Err(Rejection::UnreadablePdf.into()),
                }
                upload
            }
            (None, None) => return Err(Rejection::NoSource.into()),
        };
        self.blobs.put(&original_file, pdf).await?;

        let document = Document {
            id,
            sender_id: sender,
            template_id: new.template_id,
            title: title.to_string(),
            message: new.message.filter(|m| !m.trim().is_empty()),
            original_file,
            signed_file: None,
            expiration_date: new.expiration_date,
            status: DocumentStatus::Draft,
            created_at: now,
            sent_at: None,
            completed_at: None,
        };
        self.store.insert_document(document.clone()).await?;
        info!("Created document {} for sender {}", document.id, sender);
        Ok(document)
    }

    /// The sender's documents, newest first, optionally only those whose
    /// effective status is `status`.
    pub async fn documents(&self, sender: uuid::Uuid, status: Option<DocumentStatus>) -> Result<Vec<DocumentSummary>> {
        let now = Utc::now();
        Ok(self.store.documents_for(sender).await?
            .into_iter()
            .map(|listing| DocumentSummary {
                effective_status: listing.document.effective_status(now),
                document: listing.document,
                recipient_count: listing.recipients,
                signed_count: listing.signed,
            })
            .filter(|summary| status.map_or(true, |s| summary.effective_status == s))
            .collect())
    }

    pub async fn update_document(
        &self, sender: uuid::Uuid, document_id: uuid::Uuid, changes: DocumentChanges,
    ) -> Result<Document> {
        let document = self.owned_document(sender, document_id).await?;
        if document.status != DocumentStatus::Draft {
            return Err(Error::AlreadySent);
        }
        let title = match changes.title {
            Some(title) if title.trim().is_empty() => {
                return Err(Rejection::InvalidDocument("title is required").into());
            }
            Some(title) => title.trim().to_string(),
            None => document.title.clone(),
        };
        if matches!(changes.expiration_date, Some(exp) if exp <= Utc::now()) {
            return Err(Rejection::InvalidDocument("expiration date is in the past").into());
        }
        let document = Document {
            title,
            message: match changes.message {
                Some(message) => Some(message).filter(|m| !m.trim().is_empty()),
                None => document.message,
            },
            expiration_date: changes.expiration_date.or(document.expiration_date),
            ..document
        };

        match self.store.update_draft(document.clone()).await? {
            Edit::Applied(()) => Ok(document),
            Edit::Missing => Err(Error::NotFound("document")),
            Edit::Locked => Err(Error::AlreadySent),
        }
    }

    /// Removes a document that is not out for signature, then its files.
    pub async fn delete_document(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<()> {
        self.owned_document(sender, document_id).await?;
        let document = match self.store.delete_document(document_id, Utc::now()).await? {
            Edit::Applied(document) => document,
            Edit::Missing => return Err(Error::NotFound("document")),
            Edit::Locked => return Err(Error::InFlight),
        };
        info!("Deleted document {}", document_id);
        for file in std::iter::once(&document.original_file).chain(document.signed_file.as_ref()) {
            if let Err(err) = self.blobs.delete(file).await {
                warn!("Unable to delete {}: {}", file, err);
            }
        }
        Ok(())
    }

    pub async fn document_recipients(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<Vec<Recipient>> {
        self.owned_document(sender, document_id).await?;
        Ok(self.store.recipients(document_id).await?)
    }

    pub async fn document_detail(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<DocumentDetail> {
        let document = self.owned_document(sender, document_id).await?;
        let recipients = self.store.recipients(document_id).await?;
        Ok(DocumentDetail {
            effective_status: document.effective_status(Utc::now()),
            document,
            recipients,
        })
    }

    /// Stores the whole recipient batch and moves the document to `sent` in
    /// one write, then mails every recipient their signing link.
    pub async fn send_document(
        &self, sender: uuid::Uuid, document_id: uuid::Uuid, recipients: Vec<crate::ledger::NewRecipient>,
    ) -> Result<Vec<SentRecipient>> {
        let document = self.owned_document(sender, document_id).await?;
        if document.status != DocumentStatus::Draft {
            return Err(Error::AlreadySent);
        }
        if recipients.is_empty() {
            return Err(Error::EmptyRecipients);
        }
        let now = Utc::now();
        if document.is_expired(now) {
            return Err(Error::Expired);
        }
        let batch = crate::ledger::build_batch(document_id, recipients)?;

        if !self.store.send_document(document_id, batch.clone(), now).await? {
            return Err(Error::AlreadySent);
        }
        info!("Sent document {} to {} recipient(s)", document_id, batch.len());

        let document = Document {
            status: document.status.transition(DocumentStatus::Sent)?,
            sent_at: Some(now),
            ..document
        };
        for recipient in &batch {
            if let Err(err) = self.notifier.signing_request(&document, recipient, &self.signing_url(recipient)).await {
                warn!("Unable to send signing request to {} for {}: {}", recipient.email, document.id, err);
            }
        }

        Ok(batch.into_iter().map(|r| SentRecipient { name: r.name, email: r.email }).collect())
    }

    pub async fn void_document(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<()> {
        let document = self.owned_document(sender, document_id).await?;
        if document.status == DocumentStatus::Completed {
            return Err(Error::AlreadyCompleted);
        }
        document.status.transition(DocumentStatus::Voided)?;

        if !self.store.void_document(document_id).await? {
            // Lost to a concurrent completion or void.
            let current = self.store.document(document_id).await?
                .ok_or(Error::NotFound("document"))?;
            return Err(match current.status {
                DocumentStatus::Completed => Error::AlreadyCompleted,
                from => Error::InvalidTransition { from, to: DocumentStatus::Voided },
            });
        }
        info!("Voided document {}", document_id);
        Ok(())
    }

    /// Time-limited link to the signed PDF once completed, otherwise to the
    /// original.
    pub async fn download_url(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<String> {
        let document = self.owned_document(sender, document_id).await?;
        let file = match (document.status, &document.signed_file) {
            (DocumentStatus::Completed, Some(signed)) => signed,
            (DocumentStatus::Completed, None) => {
                return Err(Error::Internal(format!("completed document {} has no signed file", document.id)));
            }
            _ => &document.original_file,
        };
        Ok(self.file_url(file))
    }
}
