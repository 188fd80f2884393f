use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::schema::*;

#[derive(Insertable, Queryable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = templates)]
pub struct Template {
    pub id: uuid::Uuid,
    pub owner_id: uuid::Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub file: String,
    pub created_at: DateTime<Utc>,
}

/// A field box on a template page. Coordinates are PDF points measured from
/// the top-left corner of the page, y growing downwards.
#[derive(Insertable, Queryable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = placements)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub id: uuid::Uuid,
    pub template_id: uuid::Uuid,
    pub field_type: FieldType,
    pub page_number: i32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub recipient_role: String,
    pub required: bool,
    pub label: Option<String>,
}

impl Placement {
    /// Name shown to a signer when this field still has to be filled.
    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.trim().is_empty() => label.clone(),
            _ => self.field_type.to_string(),
        }
    }
}

#[derive(Insertable, Queryable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = documents)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: uuid::Uuid,
    pub sender_id: uuid::Uuid,
    pub template_id: Option<uuid::Uuid>,
    pub title: String,
    pub message: Option<String>,
    #[serde(skip_serializing)]
    pub original_file: String,
    #[serde(skip_serializing)]
    pub signed_file: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Queryable, Identifiable, Serialize, Clone, Debug, PartialEq)]
#[diesel(table_name = recipients)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: uuid::Uuid,
    pub document_id: uuid::Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub signing_order: i32,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub status: RecipientStatus,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(serialize_with = "ip_only")]
    pub ip_address: Option<ipnetwork::IpNetwork>,
}

/// What a recipient put into one field.
#[derive(Clone, Debug, PartialEq)]
pub enum SignatureValue {
    /// PNG bytes of a drawn signature or initials.
    Image(Vec<u8>),
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub id: uuid::Uuid,
    pub document_id: uuid::Uuid,
    pub recipient_id: uuid::Uuid,
    pub placement_id: uuid::Uuid,
    pub value: SignatureValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Queryable, Identifiable, Clone, Debug)]
#[diesel(table_name = signatures)]
pub struct SignatureRow {
    pub id: uuid::Uuid,
    pub document_id: uuid::Uuid,
    pub recipient_id: uuid::Uuid,
    pub placement_id: uuid::Uuid,
    pub image: Option<Vec<u8>>,
    pub text_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Signature> for SignatureRow {
    fn from(s: &Signature) -> Self {
        let (image, text_value) = match &s.value {
            SignatureValue::Image(bytes) => (Some(bytes.clone()), None),
            SignatureValue::Text(text) => (None, Some(text.clone())),
        };
        Self {
            id: s.id,
            document_id: s.document_id,
            recipient_id: s.recipient_id,
            placement_id: s.placement_id,
            image,
            text_value,
            created_at: s.created_at,
        }
    }
}

impl TryFrom<SignatureRow> for Signature {
    type Error = crate::store::StoreError;

    fn try_from(row: SignatureRow) -> Result<Self, Self::Error> {
        let value = match (row.image, row.text_value) {
            (Some(bytes), None) => SignatureValue::Image(bytes),
            (None, Some(text)) => SignatureValue::Text(text),
            _ => return Err(crate::store::StoreError::Corrupt(format!(
                "signature {} must carry exactly one of image or text", row.id
            ))),
        };
        Ok(Self {
            id: row.id,
            document_id: row.document_id,
            recipient_id: row.recipient_id,
            placement_id: row.placement_id,
            value,
            created_at: row.created_at,
        })
    }
}

fn ip_only<S: serde::Serializer>(val: &Option<ipnetwork::IpNetwork>, s: S) -> Result<S::Ok, S::Error> {
    match val {
        Some(net) => s.serialize_str(&net.ip().to_string()),
        None => s.serialize_none(),
    }
}
