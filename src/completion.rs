//! Detects the last signature on a document and produces the signed PDF.
//!
//! Several finalizers may compose the same document at once; only the one
//! whose conditional `sent -> completed` write lands keeps its artifact and
//! sends the completion email.

use chrono::Utc;
use serde::Serialize;
use sha2::Digest;
use crate::error::{Error, Result};
use crate::models::{Placement, Recipient, Signature};
use crate::pdf::{AuditSigner, AuditTrail, FieldOverlay};
use crate::schema::{DocumentStatus, RecipientStatus};
use crate::service::Esign;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Completed,
    PartiallySigned,
}

pub fn all_recipients_complete(recipients: &[Recipient]) -> bool {
    !recipients.is_empty() && recipients.iter().all(|r| r.status == RecipientStatus::Completed)
}

/// Joins stored values to their placements, in catalog order.
fn overlays(catalog: &[Placement], signatures: &[Signature]) -> Vec<FieldOverlay> {
    for s in signatures {
        if !catalog.iter().any(|p| p.id == s.placement_id) {
            warn!("Signature {} refers to unknown placement {}", s.id, s.placement_id);
        }
    }
    catalog.iter()
        .flat_map(|p| signatures.iter()
            .filter(move |s| s.placement_id == p.id)
            .map(move |s| FieldOverlay {
                page: p.page_number.max(0) as u32,
                x: p.x,
                y: p.y,
                width: p.width,
                height: p.height,
                value: s.value.clone(),
            }))
        .collect()
}

fn audit_signers(recipients: &[Recipient]) -> Vec<AuditSigner> {
    recipients.iter().map(|r| AuditSigner {
        name: r.name.clone(),
        email: r.email.clone(),
        signed_at: r.signed_at,
        ip: r.ip_address.map(|n| n.ip()),
    }).collect()
}

impl Esign {
    pub(crate) async fn detect_completion(&self, document_id: uuid::Uuid) -> Result<SubmitOutcome> {
        let recipients = self.store.recipients(document_id).await?;
        if !all_recipients_complete(&recipients) {
            return Ok(SubmitOutcome::PartiallySigned);
        }
        self.compose_and_finalize(document_id).await
    }

    pub(crate) async fn compose_and_finalize(&self, document_id: uuid::Uuid) -> Result<SubmitOutcome> {
        let document = self.store.document(document_id).await?
            .ok_or(Error::NotFound("document"))?;
        match document.status {
            DocumentStatus::Completed => return Ok(SubmitOutcome::Completed),
            DocumentStatus::Sent => {}
            other => {
                warn!("Not finalising document {} in state {}", document_id, other);
                return Ok(SubmitOutcome::PartiallySigned);
            }
        }
        let recipients = self.store.recipients(document_id).await?;
        if !all_recipients_complete(&recipients) {
            return Ok(SubmitOutcome::PartiallySigned);
        }

        let original = self.blobs.get(&document.original_file).await?;
        let catalog = self.catalog_for(&document).await?;
        let signatures = self.store.signatures(document_id).await?;
        let fields = overlays(&catalog, &signatures);
        let completed_at = Utc::now();
        let audit = AuditTrail {
            title: document.title.clone(),
            completed_at,
            original_sha256: hex::encode(sha2::Sha256::digest(&original)),
            signers: audit_signers(&recipients),
        };

        let signed = tokio::task::spawn_blocking(move || crate::pdf::compose(&original, &fields, &audit))
            .await
            .map_err(|err| Error::Internal(format!("composition task failed: {}", err)))??;

        let signed_file = format!("signed/{}/{}/signed-document.pdf", document_id, uuid::Uuid::new_v4());
        self.blobs.put(&signed_file, signed.clone()).await?;

        if !self.store.complete_document(document_id, signed_file.clone(), completed_at).await? {
            warn!("Lost completion of document {}, discarding {}", document_id, signed_file);
            if let Err(err) = self.blobs.delete(&signed_file).await {
                warn!("Unable to delete orphaned {}: {}", signed_file, err);
            }
            let current = self.store.document(document_id).await?
                .ok_or(Error::NotFound("document"))?;
            return Ok(match current.status {
                DocumentStatus::Completed => SubmitOutcome::Completed,
                _ => SubmitOutcome::PartiallySigned,
            });
        }
        info!("Document {} completed, signed copy at {}", document_id, signed_file);

        let document = crate::models::Document {
            status: document.status.transition(DocumentStatus::Completed)?,
            signed_file: Some(signed_file),
            completed_at: Some(completed_at),
            ..document
        };
        if let Err(err) = self.notifier.completed(&document, &recipients, &signed).await {
            warn!("Unable to send completion notice for {}: {}", document_id, err);
        }
        Ok(SubmitOutcome::Completed)
    }

    /// Retries finalisation of a fully signed document whose composition
    /// failed earlier.
    pub async fn resume_completion(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<SubmitOutcome> {
        let document = self.owned_document(sender, document_id).await?;
        match document.status {
            DocumentStatus::Completed => Ok(SubmitOutcome::Completed),
            DocumentStatus::Sent => self.detect_completion(document_id).await,
            from => Err(Error::InvalidTransition { from, to: DocumentStatus::Completed }),
        }
    }
}
