use serde::{Deserialize, Serialize};

#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Signature,
    Initial,
    Date,
    Text,
}

impl FieldType {
    /// Fields filled with a drawn image rather than a typed value.
    pub fn takes_image(&self) -> bool {
        match self {
            Self::Signature | Self::Initial => true,
            Self::Date | Self::Text => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Signature => "signature",
            Self::Initial => "initial",
            Self::Date => "date",
            Self::Text => "text",
        })
    }
}

#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Sent,
    Completed,
    Voided,
    Expired,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::Completed => "completed",
            Self::Voided => "voided",
            Self::Expired => "expired",
        })
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = crate::error::Rejection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => Self::Draft,
            "sent" => Self::Sent,
            "completed" => Self::Completed,
            "voided" => Self::Voided,
            "expired" => Self::Expired,
            other => return Err(crate::error::Rejection::UnknownStatus(other.to_string())),
        })
    }
}

#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Viewed,
    Completed,
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Viewed => "viewed",
            Self::Completed => "completed",
        })
    }
}

table! {
    templates (id) {
        id -> Uuid,
        owner_id -> Uuid,
        name -> Varchar,
        file -> Varchar,
        created_at -> Timestamptz,
    }
}

table! {
    placements (id) {
        id -> Uuid,
        template_id -> Uuid,
        field_type -> crate::schema::FieldTypeMapping,
        page_number -> Int4,
        x -> Float8,
        y -> Float8,
        width -> Float8,
        height -> Float8,
        recipient_role -> Varchar,
        required -> Bool,
        label -> Nullable<Varchar>,
    }
}

table! {
    documents (id) {
        id -> Uuid,
        sender_id -> Uuid,
        template_id -> Nullable<Uuid>,
        title -> Varchar,
        message -> Nullable<Varchar>,
        original_file -> Varchar,
        signed_file -> Nullable<Varchar>,
        expiration_date -> Nullable<Timestamptz>,
        status -> crate::schema::DocumentStatusMapping,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}

table! {
    recipients (id) {
        id -> Uuid,
        document_id -> Uuid,
        name -> Varchar,
        email -> Varchar,
        role -> Varchar,
        signing_order -> Int4,
        access_token -> Varchar,
        status -> crate::schema::RecipientStatusMapping,
        viewed_at -> Nullable<Timestamptz>,
        signed_at -> Nullable<Timestamptz>,
        ip_address -> Nullable<Inet>,
    }
}

table! {
    signatures (id) {
        id -> Uuid,
        document_id -> Uuid,
        recipient_id -> Uuid,
        placement_id -> Uuid,
        image -> Nullable<Bytea>,
        text_value -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

joinable!(placements -> templates (template_id));
joinable!(documents -> templates (template_id));
joinable!(recipients -> documents (document_id));
joinable!(signatures -> documents (document_id));
joinable!(signatures -> recipients (recipient_id));
joinable!(signatures -> placements (placement_id));

allow_tables_to_appear_in_same_query!(
    templates,
    placements,
    documents,
    recipients,
    signatures,
);
