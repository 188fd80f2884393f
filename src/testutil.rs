//! Fixtures shared by the unit tests.

use std::sync::Arc;
use chrono::Utc;
use crate::blob::MemoryBlobStore;
use crate::catalog::NewPlacement;
use crate::ledger::NewRecipient;
use crate::models::{Document, Placement, Recipient, Template};
use crate::notify::{Notifier, NotifyError};
use crate::schema::{DocumentStatus, FieldType, RecipientStatus};
use crate::service::{Esign, Settings};
use crate::store::{MemoryStore, Store};

/// A US Letter PDF whose page content leaves a scaling transform open.
pub fn blank_pdf(pages: u32) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let int = lopdf::Object::Integer;
    let kids = (1..=pages).map(|n| {
        let content = lopdf::content::Content {
            operations: vec![
                lopdf::content::Operation::new("cm", vec![int(2), int(0), int(0), int(2), int(0), int(0)]),
                lopdf::content::Operation::new("BT", vec![]),
                lopdf::content::Operation::new("Tf", vec!["F1".into(), int(24)]),
                lopdf::content::Operation::new("Td", vec![int(50), int(300)]),
                lopdf::content::Operation::new("Tj", vec![lopdf::Object::string_literal(format!("Page {}", n))]),
                lopdf::content::Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        lopdf::Object::Reference(page_id)
    }).collect::<Vec<_>>();

    doc.objects.insert(pages_id, lopdf::Object::Dictionary(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => int(pages as i64),
        "Resources" => resources_id,
        "MediaBox" => vec![int(0), int(0), int(612), int(792)],
    }));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// A 2x2 RGBA PNG with one transparent pixel.
pub fn tiny_png() -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 2, 2);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[
            0, 0, 0, 255, 0, 0, 0, 255,
            0, 0, 0, 255, 255, 255, 255, 0,
        ]).unwrap();
    }
    out
}

/// A `side` x `side` RGBA PNG of random pixels, which barely compresses.
pub fn noisy_png(side: u32) -> Vec<u8> {
    use rand::RngCore;
    let mut pixels = vec![0; (side * side * 4) as usize];
    rand::thread_rng().fill_bytes(&mut pixels);
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, side, side);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&pixels).unwrap();
    }
    out
}

/// `tiny_png` with its compressed image data damaged; the header still parses.
pub fn corrupt_png() -> Vec<u8> {
    let mut png = tiny_png();
    let idat = png.windows(4).position(|w| w == b"IDAT").unwrap();
    png[idat + 6] ^= 0xff;
    png
}

pub fn tiny_png_data_url() -> String {
    format!("data:image/png;base64,{}", base64::encode(tiny_png()))
}

pub fn template(owner_id: uuid::Uuid) -> Template {
    let id = uuid::Uuid::new_v4();
    Template {
        id,
        owner_id,
        name: "Test template".to_string(),
        file: format!("templates/{}/original.pdf", id),
        created_at: Utc::now(),
    }
}

pub fn placement(template_id: uuid::Uuid, field_type: FieldType, page: i32, role: &str, required: bool) -> Placement {
    Placement {
        id: uuid::Uuid::new_v4(),
        template_id,
        field_type,
        page_number: page,
        x: 50.0,
        y: 100.0,
        width: 150.0,
        height: 40.0,
        recipient_role: role.to_string(),
        required,
        label: None,
    }
}

pub fn draft_document(template_id: Option<uuid::Uuid>) -> Document {
    let id = uuid::Uuid::new_v4();
    Document {
        id,
        sender_id: uuid::Uuid::new_v4(),
        template_id,
        title: "Test document".to_string(),
        message: None,
        original_file: format!("documents/{}/original.pdf", id),
        signed_file: None,
        expiration_date: None,
        status: DocumentStatus::Draft,
        created_at: Utc::now(),
        sent_at: None,
        completed_at: None,
    }
}

pub fn recipient(document_id: uuid::Uuid, email: &str, role: &str) -> Recipient {
    Recipient {
        id: uuid::Uuid::new_v4(),
        document_id,
        name: email.split('@').next().unwrap_or(email).to_string(),
        email: email.to_string(),
        role: role.to_string(),
        signing_order: 1,
        access_token: crate::ledger::make_recipient_key(),
        status: RecipientStatus::Pending,
        viewed_at: None,
        signed_at: None,
        ip_address: None,
    }
}

pub fn field(field_type: FieldType, page: i32, y: f64, role: &str, required: bool) -> NewPlacement {
    NewPlacement {
        field_type,
        page_number: page,
        x: 72.0,
        y,
        width: 180.0,
        height: 36.0,
        recipient_role: role.to_string(),
        required,
        label: None,
    }
}

pub fn signer(name: &str, email: &str, role: &str) -> NewRecipient {
    NewRecipient {
        name: name.to_string(),
        email: email.to_string(),
        role: Some(role.to_string()),
        signing_order: None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    SigningRequest { document_id: uuid::Uuid, email: String, url: String },
    Reminder { document_id: uuid::Uuid, email: String },
    Completed { document_id: uuid::Uuid, emails: Vec<String>, pdf: Vec<u8> },
}

/// Records delivered messages; can be made to fail every delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<Sent>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn completions(&self, document_id: uuid::Uuid) -> usize {
        self.sent().iter()
            .filter(|s| matches!(s, Sent::Completed { document_id: d, .. } if *d == document_id))
            .count()
    }

    fn record(&self, sent: Sent) -> Result<(), NotifyError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError::Transport("mail server unreachable".to_string()));
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[rocket::async_trait]
impl Notifier for RecordingNotifier {
    async fn signing_request(
        &self, document: &Document, recipient: &Recipient, signing_url: &str,
    ) -> Result<(), NotifyError> {
        self.record(Sent::SigningRequest {
            document_id: document.id,
            email: recipient.email.clone(),
            url: signing_url.to_string(),
        })
    }

    async fn reminder(
        &self, document: &Document, recipient: &Recipient, _signing_url: &str,
    ) -> Result<(), NotifyError> {
        self.record(Sent::Reminder {
            document_id: document.id,
            email: recipient.email.clone(),
        })
    }

    async fn completed(
        &self, document: &Document, recipients: &[Recipient], signed_pdf: &[u8],
    ) -> Result<(), NotifyError> {
        self.record(Sent::Completed {
            document_id: document.id,
            emails: recipients.iter().map(|r| r.email.clone()).collect(),
            pdf: signed_pdf.to_vec(),
        })
    }
}

pub struct Harness {
    pub esign: Esign,
    pub store: Arc<MemoryStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let esign = Esign::new(store.clone(), blobs.clone(), notifier.clone(), Settings {
        files_key: b"test-files-key".to_vec(),
        external_uri: "https://sign.example.com".to_string(),
        link_ttl: chrono::Duration::hours(1),
        blob_timeout: std::time::Duration::from_secs(5),
    }).unwrap();
    Harness { esign, store, blobs, notifier }
}

pub struct Seeded {
    pub document: Document,
    pub placements: Vec<Placement>,
    pub recipients: Vec<Recipient>,
}

impl Seeded {
    pub fn token(&self, email: &str) -> String {
        self.recipients.iter()
            .find(|r| r.email == email)
            .map(|r| r.access_token.clone())
            .unwrap()
    }
}

/// Template with `fields`, a document from it, sent to `recipients`.
pub async fn seed(h: &Harness, pages: u32, fields: Vec<NewPlacement>, recipients: Vec<NewRecipient>) -> Seeded {
    let owner = uuid::Uuid::new_v4();
    let template = h.esign.create_template(owner, "Lease", blank_pdf(pages)).await.unwrap();
    let placements = h.esign.replace_placements(owner, template.id, fields).await.unwrap();
    let document = h.esign.create_document(owner, crate::status::NewDocument {
        template_id: Some(template.id),
        title: "Lease agreement".to_string(),
        message: Some("Please sign".to_string()),
        expiration_date: None,
    }, None).await.unwrap();
    h.esign.send_document(owner, document.id, recipients).await.unwrap();
    Seeded {
        document: h.store.document(document.id).await.unwrap().unwrap(),
        placements,
        recipients: h.store.recipients(document.id).await.unwrap(),
    }
}
