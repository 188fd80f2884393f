use std::sync::Arc;
use crate::blob::{BlobError, BlobStore, TimeoutBlobs};
use crate::error::{Error, Result};
use crate::files::{FileKeyError, FileSigner};
use crate::models;
use crate::notify::Notifier;
use crate::store::Store;

pub struct Settings {
    pub files_key: Vec<u8>,
    pub external_uri: String,
    pub link_ttl: chrono::Duration,
    pub blob_timeout: std::time::Duration,
}

/// The signing workflow bound to its collaborators.
///
/// Every public operation lives in an `impl Esign` block of the module that
/// owns it: `catalog`, `ledger`, `status`, `session`, `intake` and
/// `completion`.
pub struct Esign {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) links: FileSigner,
    pub(crate) external_uri: String,
}

impl Esign {
    pub fn new(
        store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>, notifier: Arc<dyn Notifier>, settings: Settings,
    ) -> std::result::Result<Self, FileKeyError> {
        Ok(Self {
            store,
            blobs: Arc::new(TimeoutBlobs::new(blobs, settings.blob_timeout)),
            notifier,
            links: FileSigner::new(&settings.files_key, settings.link_ttl)?,
            external_uri: settings.external_uri.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) async fn owned_document(&self, sender: uuid::Uuid, document_id: uuid::Uuid) -> Result<models::Document> {
        let document = self.store.document(document_id).await?
            .ok_or(Error::NotFound("document"))?;
        if document.sender_id != sender {
            return Err(Error::AccessDenied);
        }
        Ok(document)
    }

    pub(crate) fn file_url(&self, file_path: &str) -> String {
        self.links.url(&self.external_uri, file_path)
    }

    pub(crate) fn signing_url(&self, recipient: &models::Recipient) -> String {
        format!("{}/sign/{}", self.external_uri, recipient.access_token)
    }

    /// Bytes of a blob reached through a time-limited link.
    pub async fn open_file(&self, file_path: &str, key: &str) -> Result<Vec<u8>> {
        if let Err(err) = self.links.verify(file_path, key) {
            debug!("Refusing file {}: {}", file_path, err);
            return Err(Error::AccessDenied);
        }
        match self.blobs.get(file_path).await {
            Ok(data) => Ok(data),
            Err(BlobError::NotFound(_)) | Err(BlobError::InvalidKey(_)) => Err(Error::NotFound("file")),
            Err(err) => Err(err.into()),
        }
    }
}
