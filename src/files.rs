use chrono::{DateTime, Utc};
use hmac::{Mac, NewMac};

type HmacSha512 = hmac::Hmac<sha2::Sha512>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FileKeyError {
    #[error("file key is malformed")]
    Malformed,
    #[error("file key does not match")]
    BadSignature,
    #[error("file key has expired")]
    Expired,
    #[error("file signing key is unusable")]
    InvalidSecret,
}

/// Issues and checks time-limited download keys of the form
/// `{expiry};{mac}`, where the MAC covers the blob path and the expiry.
#[derive(Clone)]
pub struct FileSigner {
    mac: HmacSha512,
    ttl: chrono::Duration,
}

impl std::fmt::Debug for FileSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSigner").field("ttl", &self.ttl).finish()
    }
}

impl FileSigner {
    pub fn new(secret: &[u8], ttl: chrono::Duration) -> Result<Self, FileKeyError> {
        let mac = HmacSha512::new_from_slice(secret).map_err(|_| FileKeyError::InvalidSecret)?;
        Ok(Self { mac, ttl })
    }

    fn tag(&self, file_path: &str, expiry: &str) -> HmacSha512 {
        let file_path = base64::encode_config(file_path.as_bytes(), base64::URL_SAFE_NO_PAD);
        let mut mac = self.mac.clone();
        mac.update(format!("{};{}", file_path, expiry).as_bytes());
        mac
    }

    pub fn sign(&self, file_path: &str) -> String {
        self.sign_at(file_path, Utc::now())
    }

    pub fn sign_at(&self, file_path: &str, now: DateTime<Utc>) -> String {
        let expiry = (now + self.ttl).timestamp().to_string();
        let code = self.tag(file_path, &expiry).finalize().into_bytes();
        format!("{};{}", expiry, base64::encode_config(code, base64::URL_SAFE_NO_PAD))
    }

    pub fn verify(&self, file_path: &str, key: &str) -> Result<(), FileKeyError> {
        self.verify_at(file_path, key, Utc::now())
    }

    pub fn verify_at(&self, file_path: &str, key: &str, now: DateTime<Utc>) -> Result<(), FileKeyError> {
        let (expiry, code) = key.split_once(';').ok_or(FileKeyError::Malformed)?;
        let expires_at = expiry.parse::<i64>().ok()
            .and_then(|t| chrono::NaiveDateTime::from_timestamp_opt(t, 0))
            .map(|t| DateTime::<Utc>::from_utc(t, Utc))
            .ok_or(FileKeyError::Malformed)?;
        let code = base64::decode_config(code, base64::URL_SAFE_NO_PAD)
            .map_err(|_| FileKeyError::Malformed)?;

        self.tag(file_path, expiry).verify(&code).map_err(|_| FileKeyError::BadSignature)?;

        if expires_at < now {
            return Err(FileKeyError::Expired);
        }
        Ok(())
    }

    /// Absolute download URL for a blob.
    pub fn url(&self, external_uri: &str, file_path: &str) -> String {
        format!("{}/files/{}?key={}", external_uri.trim_end_matches('/'), file_path, self.sign(file_path))
    }
}
