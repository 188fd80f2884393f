//! Record storage used by the signing workflow.
//!
//! Every method that touches more than one row is a single transaction in the
//! backing implementation: either everything it describes becomes visible, or
//! nothing does. Conditional updates report whether they applied so callers
//! can tell a lost race from a failure.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use crate::models::{Document, Placement, Recipient, Signature, Template};
use crate::schema::{DocumentStatus, RecipientStatus};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("unable to get database connection: {0}")]
    Pool(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// How a conditional write ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit<T = ()> {
    Applied(T),
    Missing,
    /// The row exists but its state forbids the change.
    Locked,
}

/// A sender's document with how far its signing has got.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentListing {
    pub document: Document,
    pub recipients: usize,
    pub signed: usize,
}

#[rocket::async_trait]
pub trait Store: Send + Sync {
    async fn insert_template(&self, template: Template) -> StoreResult<()>;

    async fn template(&self, id: uuid::Uuid) -> StoreResult<Option<Template>>;

    /// Templates of one owner, newest first.
    async fn templates_for(&self, owner_id: uuid::Uuid) -> StoreResult<Vec<Template>>;

    /// Deletes a template and its placements. `Locked` while any document
    /// still refers to it.
    async fn delete_template(&self, template_id: uuid::Uuid) -> StoreResult<Edit<Template>>;

    /// Placements of a template ordered by page, then top offset.
    async fn placements(&self, template_id: uuid::Uuid) -> StoreResult<Vec<Placement>>;

    /// Swaps the whole placement set of a template. Refused (returns `false`)
    /// while any document created from the template has left `draft`.
    async fn replace_placements(&self, template_id: uuid::Uuid, placements: Vec<Placement>) -> StoreResult<bool>;

    /// Overwrites one placement of a template, keeping its id. Same lock as
    /// `replace_placements`.
    async fn update_placement(&self, placement: Placement) -> StoreResult<Edit>;

    async fn delete_placement(&self, template_id: uuid::Uuid, placement_id: uuid::Uuid) -> StoreResult<Edit>;

    async fn insert_document(&self, document: Document) -> StoreResult<()>;

    /// Documents of one sender, newest first, with recipient counts.
    async fn documents_for(&self, sender_id: uuid::Uuid) -> StoreResult<Vec<DocumentListing>>;

    /// Writes title, message and expiration date of a draft. `Locked` once
    /// the document has left `draft`.
    async fn update_draft(&self, document: Document) -> StoreResult<Edit>;

    /// Deletes a document with its recipients and signatures. `Locked` while
    /// it is `sent` and not yet past its expiration date at `now`.
    async fn delete_document(&self, document_id: uuid::Uuid, now: DateTime<Utc>) -> StoreResult<Edit<Document>>;

    async fn document(&self, id: uuid::Uuid) -> StoreResult<Option<Document>>;

    async fn recipient_by_token(&self, token: &str) -> StoreResult<Option<Recipient>>;

    /// Recipients of a document ordered by signing order.
    async fn recipients(&self, document_id: uuid::Uuid) -> StoreResult<Vec<Recipient>>;

    /// Inserts the recipient batch and moves the document `draft -> sent`.
    /// Returns `false` without inserting anything if the document is no
    /// longer a draft.
    async fn send_document(
        &self, document_id: uuid::Uuid, recipients: Vec<Recipient>, sent_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `pending -> viewed`. Returns `false` if the recipient was not pending.
    async fn mark_viewed(
        &self, recipient_id: uuid::Uuid, at: DateTime<Utc>, ip: Option<ipnetwork::IpNetwork>,
    ) -> StoreResult<bool>;

    /// Inserts the recipient's signatures and marks them completed. Returns
    /// `false` without inserting anything if the recipient already completed.
    async fn record_signatures(
        &self, recipient_id: uuid::Uuid, signatures: Vec<Signature>, signed_at: DateTime<Utc>,
        ip: Option<ipnetwork::IpNetwork>,
    ) -> StoreResult<bool>;

    async fn signatures(&self, document_id: uuid::Uuid) -> StoreResult<Vec<Signature>>;

    async fn recipient_signatures(&self, recipient_id: uuid::Uuid) -> StoreResult<Vec<Signature>>;

    /// `sent -> completed`, setting the signed file in the same write.
    /// Returns `false` if the document was not `sent` any more.
    async fn complete_document(
        &self, document_id: uuid::Uuid, signed_file: String, completed_at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// `draft|sent -> voided`. Returns `false` if the document was in any
    /// other state.
    async fn void_document(&self, document_id: uuid::Uuid) -> StoreResult<bool>;
}

#[derive(Default)]
struct Tables {
    templates: BTreeMap<uuid::Uuid, Template>,
    placements: Vec<Placement>,
    documents: BTreeMap<uuid::Uuid, Document>,
    recipients: Vec<Recipient>,
    signatures: Vec<Signature>,
}

/// Process-local store. Each method holds one lock for its whole body, which
/// gives the same all-or-nothing visibility as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: std::sync::Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }
}

impl Tables {
    fn template_in_use(&self, template_id: uuid::Uuid) -> bool {
        self.documents.values()
            .any(|d| d.template_id == Some(template_id) && d.status != DocumentStatus::Draft)
    }
}

fn catalog_order(a: &Placement, b: &Placement) -> std::cmp::Ordering {
    a.page_number.cmp(&b.page_number)
        .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
}

#[rocket::async_trait]
impl Store for MemoryStore {
    async fn insert_template(&self, template: Template) -> StoreResult<()> {
        let mut t = self.tables()?;
        if t.templates.contains_key(&template.id) {
            return Err(StoreError::Conflict(format!("template {}", template.id)));
        }
        t.templates.insert(template.id, template);
        Ok(())
    }

    async fn template(&self, id: uuid::Uuid) -> StoreResult<Option<Template>> {
        Ok(self.tables()?.templates.get(&id).cloned())
    }

    async fn templates_for(&self, owner_id: uuid::Uuid) -> StoreResult<Vec<Template>> {
        let t = self.tables()?;
        let mut templates = t.templates.values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect::<Vec<_>>();
        templates.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(templates)
    }

    async fn delete_template(&self, template_id: uuid::Uuid) -> StoreResult<Edit<Template>> {
        let mut t = self.tables()?;
        if !t.templates.contains_key(&template_id) {
            return Ok(Edit::Missing);
        }
        if t.documents.values().any(|d| d.template_id == Some(template_id)) {
            return Ok(Edit::Locked);
        }
        t.placements.retain(|p| p.template_id != template_id);
        match t.templates.remove(&template_id) {
            Some(template) => Ok(Edit::Applied(template)),
            None => Ok(Edit::Missing),
        }
    }

    async fn placements(&self, template_id: uuid::Uuid) -> StoreResult<Vec<Placement>> {
        let t = self.tables()?;
        let mut placements = t.placements.iter()
            .filter(|p| p.template_id == template_id)
            .cloned()
            .collect::<Vec<_>>();
        placements.sort_by(catalog_order);
        Ok(placements)
    }

    async fn replace_placements(&self, template_id: uuid::Uuid, placements: Vec<Placement>) -> StoreResult<bool> {
        let mut t = self.tables()?;
        if t.template_in_use(template_id) {
            return Ok(false);
        }
        t.placements.retain(|p| p.template_id != template_id);
        t.placements.extend(placements);
        Ok(true)
    }

    async fn update_placement(&self, placement: Placement) -> StoreResult<Edit> {
        let mut t = self.tables()?;
        if t.template_in_use(placement.template_id) {
            return Ok(Edit::Locked);
        }
        let exists = t.placements.iter()
            .any(|p| p.id == placement.id && p.template_id == placement.template_id);
        if !exists {
            return Ok(Edit::Missing);
        }
        if let Some(p) = t.placements.iter_mut().find(|p| p.id == placement.id) {
            *p = placement;
        }
        Ok(Edit::Applied(()))
    }

    async fn delete_placement(&self, template_id: uuid::Uuid, placement_id: uuid::Uuid) -> StoreResult<Edit> {
        let mut t = self.tables()?;
        if t.template_in_use(template_id) {
            return Ok(Edit::Locked);
        }
        if !t.placements.iter().any(|p| p.id == placement_id && p.template_id == template_id) {
            return Ok(Edit::Missing);
        }
        t.placements.retain(|p| p.id != placement_id);
        Ok(Edit::Applied(()))
    }

    async fn insert_document(&self, document: Document) -> StoreResult<()> {
        let mut t = self.tables()?;
        if t.documents.contains_key(&document.id) {
            return Err(StoreError::Conflict(format!("document {}", document.id)));
        }
        t.documents.insert(document.id, document);
        Ok(())
    }

    async fn document(&self, id: uuid::Uuid) -> StoreResult<Option<Document>> {
        Ok(self.tables()?.documents.get(&id).cloned())
    }

    async fn documents_for(&self, sender_id: uuid::Uuid) -> StoreResult<Vec<DocumentListing>> {
        let t = self.tables()?;
        let mut listings = t.documents.values()
            .filter(|d| d.sender_id == sender_id)
            .map(|d| {
                let recipients = t.recipients.iter().filter(|r| r.document_id == d.id);
                DocumentListing {
                    document: d.clone(),
                    recipients: recipients.clone().count(),
                    signed: recipients.filter(|r| r.status == RecipientStatus::Completed).count(),
                }
            })
            .collect::<Vec<_>>();
        listings.sort_by(|a, b| b.document.created_at.cmp(&a.document.created_at));
        Ok(listings)
    }

    async fn update_draft(&self, document: Document) -> StoreResult<Edit> {
        let mut t = self.tables()?;
        match t.documents.get_mut(&document.id) {
            Some(d) if d.status == DocumentStatus::Draft => {
                d.title = document.title;
                d.message = document.message;
                d.expiration_date = document.expiration_date;
                Ok(Edit::Applied(()))
            }
            Some(_) => Ok(Edit::Locked),
            None => Ok(Edit::Missing),
        }
    }

    async fn delete_document(&self, document_id: uuid::Uuid, now: DateTime<Utc>) -> StoreResult<Edit<Document>> {
        let mut t = self.tables()?;
        match t.documents.get(&document_id) {
            Some(d) if d.status == DocumentStatus::Sent && !d.is_expired(now) => return Ok(Edit::Locked),
            Some(_) => {}
            None => return Ok(Edit::Missing),
        }
        t.signatures.retain(|s| s.document_id != document_id);
        t.recipients.retain(|r| r.document_id != document_id);
        match t.documents.remove(&document_id) {
            Some(document) => Ok(Edit::Applied(document)),
            None => Ok(Edit::Missing),
        }
    }

    async fn recipient_by_token(&self, token: &str) -> StoreResult<Option<Recipient>> {
        Ok(self.tables()?.recipients.iter().find(|r| r.access_token == token).cloned())
    }

    async fn recipients(&self, document_id: uuid::Uuid) -> StoreResult<Vec<Recipient>> {
        let t = self.tables()?;
        let mut recipients = t.recipients.iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect::<Vec<_>>();
        recipients.sort_by_key(|r| r.signing_order);
        Ok(recipients)
    }

    async fn send_document(
        &self, document_id: uuid::Uuid, recipients: Vec<Recipient>, sent_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.documents.get(&document_id) {
            Some(d) if d.status == DocumentStatus::Draft => {}
            _ => return Ok(false),
        }
        for (i, recipient) in recipients.iter().enumerate() {
            let clashes = t.recipients.iter()
                .chain(recipients[..i].iter())
                .any(|r| r.access_token == recipient.access_token || r.id == recipient.id);
            if clashes {
                return Err(StoreError::Conflict(format!("recipient {}", recipient.id)));
            }
        }
        t.recipients.extend(recipients);
        if let Some(d) = t.documents.get_mut(&document_id) {
            d.status = DocumentStatus::Sent;
            d.sent_at = Some(sent_at);
        }
        Ok(true)
    }

    async fn mark_viewed(
        &self, recipient_id: uuid::Uuid, at: DateTime<Utc>, ip: Option<ipnetwork::IpNetwork>,
    ) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.recipients.iter_mut().find(|r| r.id == recipient_id) {
            Some(r) if r.status == RecipientStatus::Pending => {
                r.status = RecipientStatus::Viewed;
                r.viewed_at = Some(at);
                if ip.is_some() {
                    r.ip_address = ip;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_signatures(
        &self, recipient_id: uuid::Uuid, signatures: Vec<Signature>, signed_at: DateTime<Utc>,
        ip: Option<ipnetwork::IpNetwork>,
    ) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.recipients.iter().find(|r| r.id == recipient_id) {
            Some(r) if r.status != RecipientStatus::Completed => {}
            _ => return Ok(false),
        }
        for (i, s) in signatures.iter().enumerate() {
            let clashes = t.signatures.iter()
                .chain(signatures[..i].iter())
                .any(|o| {
                    o.id == s.id || (o.document_id == s.document_id
                        && o.recipient_id == s.recipient_id
                        && o.placement_id == s.placement_id)
                });
            if clashes || s.recipient_id != recipient_id {
                return Err(StoreError::Conflict(format!("signature for placement {}", s.placement_id)));
            }
        }
        t.signatures.extend(signatures);
        if let Some(r) = t.recipients.iter_mut().find(|r| r.id == recipient_id) {
            r.status = RecipientStatus::Completed;
            r.signed_at = Some(signed_at);
            if ip.is_some() {
                r.ip_address = ip;
            }
        }
        Ok(true)
    }

    async fn signatures(&self, document_id: uuid::Uuid) -> StoreResult<Vec<Signature>> {
        Ok(self.tables()?.signatures.iter().filter(|s| s.document_id == document_id).cloned().collect())
    }

    async fn recipient_signatures(&self, recipient_id: uuid::Uuid) -> StoreResult<Vec<Signature>> {
        Ok(self.tables()?.signatures.iter().filter(|s| s.recipient_id == recipient_id).cloned().collect())
    }

    async fn complete_document(
        &self, document_id: uuid::Uuid, signed_file: String, completed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.documents.get_mut(&document_id) {
            Some(d) if d.status == DocumentStatus::Sent => {
                d.status = DocumentStatus::Completed;
                d.signed_file = Some(signed_file);
                d.completed_at = Some(completed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn void_document(&self, document_id: uuid::Uuid) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.documents.get_mut(&document_id) {
            Some(d) if matches!(d.status, DocumentStatus::Draft | DocumentStatus::Sent) => {
                d.status = DocumentStatus::Voided;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
