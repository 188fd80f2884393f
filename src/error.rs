use crate::schema::{DocumentStatus, RecipientStatus};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure the signing workflow reports to its callers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("access denied")]
    AccessDenied,
    #[error("document already sent")]
    AlreadySent,
    #[error("at least one recipient is required")]
    EmptyRecipients,
    #[error("document has expired")]
    Expired,
    #[error("document has been voided")]
    Voided,
    #[error("already completed")]
    AlreadyCompleted,
    #[error("document cannot move from {from} to {to}")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },
    #[error("recipient cannot move from {from} to {to}")]
    RecipientRegression {
        from: RecipientStatus,
        to: RecipientStatus,
    },
    #[error("template is still used by a document")]
    TemplateInUse,
    #[error("document is out for signature, void it first")]
    InFlight,
    #[error("all required fields must be filled, missing: {0}")]
    MissingRequiredField(String),
    #[error("invalid submission: {0}")]
    InvalidSubmission(#[from] Rejection),
    #[error("storage error: {0}")]
    Storage(#[from] crate::store::StoreError),
    #[error("file storage error: {0}")]
    Blob(#[from] crate::blob::BlobError),
    #[error("unable to compose PDF: {0}")]
    Pdf(#[from] crate::pdf::PdfError),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Reasons a submitted payload is refused before anything is written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("placement {0} is not assigned to this recipient")]
    ForeignPlacement(uuid::Uuid),
    #[error("placement {0} was submitted more than once")]
    DuplicateEntry(uuid::Uuid),
    #[error("placement {placement} expects {expected}")]
    PayloadMismatch {
        placement: uuid::Uuid,
        expected: &'static str,
    },
    #[error("placement {0} carries an image that is not a PNG")]
    InvalidImage(uuid::Uuid),
    #[error("placement {0} carries an empty value")]
    EmptyValue(uuid::Uuid),
    #[error("placement #{index}: {reason}")]
    InvalidPlacement {
        index: usize,
        reason: &'static str,
    },
    #[error("recipient #{index}: {reason}")]
    InvalidRecipient {
        index: usize,
        reason: &'static str,
    },
    #[error("document {0}")]
    InvalidDocument(&'static str),
    #[error("a template or an uploaded PDF is required")]
    NoSource,
    #[error("uploaded file is not a readable PDF")]
    UnreadablePdf,
    #[error("unknown document status {0:?}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AccessDenied,
    InvalidState,
    Validation,
    TransientInfra,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AccessDenied => ErrorKind::AccessDenied,
            Self::AlreadySent
            | Self::Expired
            | Self::Voided
            | Self::AlreadyCompleted
            | Self::InvalidTransition { .. }
            | Self::RecipientRegression { .. }
            | Self::TemplateInUse
            | Self::InFlight => ErrorKind::InvalidState,
            Self::EmptyRecipients
            | Self::MissingRequiredField(_)
            | Self::InvalidSubmission(_) => ErrorKind::Validation,
            Self::Storage(crate::store::StoreError::Corrupt(_))
            | Self::Blob(crate::blob::BlobError::NotFound(_))
            | Self::Blob(crate::blob::BlobError::InvalidKey(_)) => ErrorKind::Internal,
            Self::Storage(_) | Self::Blob(_) => ErrorKind::TransientInfra,
            Self::Pdf(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the operation after a short back-off.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientInfra
    }
}
