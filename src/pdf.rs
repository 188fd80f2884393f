//! Final document composition: signature overlays on the original pages plus
//! a generated audit trail.
//!
//! Placement coordinates arrive in points from the top-left corner of the
//! page with y growing downwards, and are flipped into PDF space against the
//! page's MediaBox here. The original content streams are left byte-for-byte
//! untouched; each stamped page gets its content wrapped as
//! `q <original> Q <overlay>` so transforms the original leaves open cannot
//! shift the overlay.

use std::io::Write;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use lopdf::content::Operation;
use crate::models::SignatureValue;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

const FONT_NAME: &str = "F_esign_Helvetica";
const TEXT_INSET: f64 = 5.0;
const MAX_FONT_SIZE: f64 = 12.0;
const US_LETTER: (f64, f64) = (612.0, 792.0);

const AUDIT_MARGIN: f64 = 50.0;
const AUDIT_TOP: f64 = 100.0;
const AUDIT_LINE: f64 = 20.0;

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("PNG error: {0}")]
    Png(#[from] png::DecodingError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("malformed PDF: {0}")]
    Malformed(String),
}

/// One stored value to draw, positioned like its placement.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldOverlay {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub value: SignatureValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditSigner {
    pub name: String,
    pub email: String,
    pub signed_at: Option<DateTime<Utc>>,
    pub ip: Option<std::net::IpAddr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditTrail {
    pub title: String,
    pub completed_at: DateTime<Utc>,
    pub original_sha256: String,
    pub signers: Vec<AuditSigner>,
}

struct BoundingBox {
    ll: (f64, f64),
    ur: (f64, f64),
}

impl BoundingBox {
    fn width(&self) -> f64 {
        self.ur.0 - self.ll.0
    }

    fn height(&self) -> f64 {
        self.ur.1 - self.ll.1
    }

    /// Maps a top-left-origin box onto PDF user space.
    fn convert_to_pdf_space(&self, x: f64, y: f64, width: f64, height: f64) -> PDFSpacePos {
        PDFSpacePos {
            x: self.ll.0 + x,
            y: self.ll.1 + self.height() - y - height,
            w: width,
            h: height,
        }
    }
}

#[derive(Debug, PartialEq)]
struct PDFSpacePos {
    x: f64,
    y: f64,
    w: f64,
    h: f64,
}

fn real(v: f64) -> lopdf::Object {
    lopdf::Object::Real(v as _)
}

fn number(obj: &lopdf::Object) -> Option<f64> {
    match obj {
        lopdf::Object::Integer(i) => Some(*i as f64),
        lopdf::Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Helvetica is set up with WinAnsiEncoding; anything outside Latin-1 is
/// replaced.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7e | 0xa0..=0xff => c as u8,
            _ if c.is_whitespace() => b' ',
            _ => b'?',
        })
        .collect()
}

fn text_ops(text: &str, x: f64, y: f64, size: f64, gray: f64) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("g", vec![real(gray)]),
        Operation::new("Tf", vec![FONT_NAME.into(), real(size)]),
        Operation::new("Td", vec![real(x), real(y)]),
        Operation::new("Tj", vec![lopdf::Object::string_literal(win_ansi(text))]),
        Operation::new("ET", vec![]),
    ]
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PdfError> {
    let mut zlib_encoder = deflate::write::ZlibEncoder::new(Vec::new(), deflate::Compression::Default);
    zlib_encoder.write_all(data)?;
    Ok(zlib_encoder.finish()?)
}

/// A PNG split into 8-bit colour samples and an optional alpha plane.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub pixels: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

/// Fully decodes a PNG. Anything this accepts can be embedded by `compose`.
pub fn decode_png(data: &[u8]) -> Result<DecodedImage, PdfError> {
    let mut img = png::Decoder::new(data);
    img.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut img_reader = img.read_info()?;
    let mut img_buf = vec![0; img_reader.output_buffer_size()];
    let img_data = img_reader.next_frame(&mut img_buf)?;
    let img_bytes = &img_buf[..img_data.buffer_size()];

    if img_data.bit_depth != png::BitDepth::Eight {
        return Err(PdfError::UnsupportedImage(format!("bit depth {:?}", img_data.bit_depth)));
    }

    let (pixels, color_space, alpha) = match img_data.color_type {
        png::ColorType::Grayscale => (img_bytes.to_vec(), "DeviceGray", None),
        png::ColorType::Rgb => (img_bytes.to_vec(), "DeviceRGB", None),
        png::ColorType::GrayscaleAlpha => {
            let (gray, alpha): (Vec<u8>, Vec<u8>) = img_bytes.chunks_exact(2)
                .map(|px| (px[0], px[1]))
                .unzip();
            (gray, "DeviceGray", Some(alpha))
        }
        png::ColorType::Rgba => {
            let mut rgb_bytes = Vec::with_capacity((img_bytes.len() / 4) * 3);
            let mut alpha_bytes = Vec::with_capacity(img_bytes.len() / 4);
            for px in img_bytes.chunks_exact(4) {
                rgb_bytes.extend_from_slice(&px[..3]);
                alpha_bytes.push(px[3]);
            }
            (rgb_bytes, "DeviceRGB", Some(alpha_bytes))
        }
        other => return Err(PdfError::UnsupportedImage(format!("colour type {:?}", other))),
    };

    Ok(DecodedImage {
        width: img_data.width,
        height: img_data.height,
        color_space,
        pixels,
        alpha,
    })
}

/// Number of pages in a PDF, or an error if lopdf cannot read it.
pub fn page_count(bytes: &[u8]) -> Result<u32, PdfError> {
    let doc = lopdf::Document::load_mem(bytes)?;
    Ok(doc.get_pages().len() as u32)
}

/// Draws every field onto its page and appends the audit trail.
///
/// Fields on pages the document does not have are skipped. Given the same
/// inputs the output is identical.
pub fn compose(original: &[u8], fields: &[FieldOverlay], audit: &AuditTrail) -> Result<Vec<u8>, PdfError> {
    let mut doc = Document::load(original)?;

    let mut fields = fields.iter().collect::<Vec<_>>();
    fields.sort_by_key(|f| f.page);
    let by_page = fields.into_iter().group_by(|f| f.page);
    for (page_num, page_fields) in by_page.into_iter() {
        let page_fields = page_fields.collect::<Vec<_>>();
        if !doc.pages.contains_key(&page_num) {
            warn!("Skipping {} field(s) on page {}, document has {} page(s)", page_fields.len(), page_num, doc.pages.len());
            continue;
        }
        doc.stamp_page(page_num, &page_fields)?;
    }

    doc.append_audit_trail(audit)?;
    doc.finalise()
}

pub struct Document {
    inner_doc: lopdf::Document,
    pages: std::collections::BTreeMap<u32, lopdf::ObjectId>,
    font_id: Option<lopdf::ObjectId>,
    image_count: usize,
}

impl Document {
    pub fn load(bytes: &[u8]) -> Result<Self, PdfError> {
        let inner_doc = lopdf::Document::load_mem(bytes)?;
        Ok(Self {
            pages: inner_doc.get_pages(),
            inner_doc,
            font_id: None,
            image_count: 0,
        })
    }

    pub fn finalise(mut self) -> Result<Vec<u8>, PdfError> {
        let mut out = Vec::new();
        self.inner_doc.save_to(&mut out)?;
        Ok(out)
    }

    fn create_or_get_font_id(&mut self) -> lopdf::ObjectId {
        match self.font_id {
            Some(f) => f,
            None => {
                let font_id = self.inner_doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                });
                self.font_id = Some(font_id);
                font_id
            }
        }
    }

    fn get_inherited_attr(&self, key: &[u8], page_id: lopdf::ObjectId) -> Option<&lopdf::Object> {
        let mut node = self.inner_doc.get_dictionary(page_id).ok()?;
        // Parent chains in damaged files can be cyclic.
        for _ in 0..64 {
            if let Ok(obj) = node.get(key) {
                return Some(obj);
            }
            let parent = node.get(b"Parent").and_then(lopdf::Object::as_reference).ok()?;
            node = self.inner_doc.get_dictionary(parent).ok()?;
        }
        None
    }

    fn resolve<'a>(&'a self, obj: &'a lopdf::Object) -> Result<&'a lopdf::Object, PdfError> {
        match obj {
            lopdf::Object::Reference(id) => Ok(self.inner_doc.get_object(*id)?),
            o => Ok(o),
        }
    }

    fn get_media_box(&self, page_id: lopdf::ObjectId) -> Result<BoundingBox, PdfError> {
        let media_box = match self.get_inherited_attr(b"MediaBox", page_id) {
            Some(m) => self.resolve(m)?.as_array()?,
            None => return Ok(BoundingBox { ll: (0.0, 0.0), ur: US_LETTER }),
        };
        if media_box.len() != 4 {
            return Err(PdfError::Malformed(format!(
                "expected MediaBox to have 4 elements, actually had {}", media_box.len()
            )));
        }
        let media_box = media_box.iter()
            .map(number)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PdfError::Malformed("non-numeric MediaBox".to_string()))?;

        let c1 = (media_box[0], media_box[1]);
        let c2 = (media_box[2], media_box[3]);

        Ok(BoundingBox {
            ll: (c1.0.min(c2.0), c1.1.min(c2.1)),
            ur: (c1.0.max(c2.0), c1.1.max(c2.1)),
        })
    }

    /// A private copy of the page's effective resources with its Font and
    /// XObject maps inlined, so shared resource objects are never mutated.
    fn page_resources(&self, page_id: lopdf::ObjectId) -> Result<lopdf::Dictionary, PdfError> {
        let mut resources = match self.get_inherited_attr(b"Resources", page_id) {
            Some(r) => self.resolve(r)?.as_dict()?.clone(),
            None => lopdf::Dictionary::new(),
        };
        for key in [&b"Font"[..], &b"XObject"[..]] {
            let inlined = match resources.get(key) {
                Ok(entry) => self.resolve(entry)?.as_dict()?.clone(),
                Err(_) => lopdf::Dictionary::new(),
            };
            resources.set(key, inlined);
        }
        Ok(resources)
    }

    fn page_contents(&self, page_id: lopdf::ObjectId) -> Result<Vec<lopdf::Object>, PdfError> {
        let page = self.inner_doc.get_dictionary(page_id)?;
        Ok(match page.get(b"Contents") {
            Ok(lopdf::Object::Array(items)) => items.clone(),
            Ok(lopdf::Object::Reference(id)) => match self.inner_doc.get_object(*id)? {
                lopdf::Object::Array(items) => items.clone(),
                _ => vec![lopdf::Object::Reference(*id)],
            },
            Ok(_) => return Err(PdfError::Malformed("page Contents is not a stream".to_string())),
            Err(_) => vec![],
        })
    }

    fn stamp_page(&mut self, page_num: u32, fields: &[&FieldOverlay]) -> Result<(), PdfError> {
        let page_id = *self.pages.get(&page_num)
            .ok_or_else(|| PdfError::Malformed(format!("page {} does not exist", page_num)))?;
        let media_box = self.get_media_box(page_id)?;
        let mut resources = self.page_resources(page_id)?;
        let mut contents = self.page_contents(page_id)?;

        let font_id = self.create_or_get_font_id();
        resources.get_mut(b"Font")?.as_dict_mut()?.set(FONT_NAME, lopdf::Object::Reference(font_id));

        let mut ops = vec![];
        for field in fields {
            let pos = media_box.convert_to_pdf_space(field.x, field.y, field.width, field.height);
            match &field.value {
                SignatureValue::Image(png) => {
                    let img_obj_id = self.png_to_xobj(png)?;
                    self.image_count += 1;
                    let img_name = format!("Im_esign_{}", self.image_count);
                    resources.get_mut(b"XObject")?.as_dict_mut()?
                        .set(img_name.as_bytes(), lopdf::Object::Reference(img_obj_id));
                    ops.extend(vec![
                        Operation::new("q", vec![]),
                        Operation::new("cm", vec![
                            real(pos.w), real(0.0), real(0.0), real(pos.h), real(pos.x), real(pos.y),
                        ]),
                        Operation::new("Do", vec![lopdf::Object::Name(img_name.into_bytes())]),
                        Operation::new("Q", vec![]),
                    ]);
                }
                SignatureValue::Text(text) => {
                    let size = (pos.h * 0.6).min(MAX_FONT_SIZE);
                    let baseline = pos.y + pos.h / 2.0 - size / 3.0;
                    ops.extend(text_ops(text, pos.x + TEXT_INSET, baseline, size, 0.0));
                }
            }
        }

        let mut overlay = b"\nQ\n".to_vec();
        overlay.extend(lopdf::content::Content { operations: ops }.encode()?);
        let open_id = self.inner_doc.add_object(lopdf::Stream::new(dictionary! {}, b"q\n".to_vec()));
        let overlay_id = self.inner_doc.add_object(lopdf::Stream::new(dictionary! {}, overlay));

        contents.insert(0, lopdf::Object::Reference(open_id));
        contents.push(lopdf::Object::Reference(overlay_id));

        let page = self.inner_doc.get_object_mut(page_id)?.as_dict_mut()?;
        page.set("Contents", lopdf::Object::Array(contents));
        page.set("Resources", resources);
        Ok(())
    }

    pub fn png_to_xobj(&mut self, data: &[u8]) -> Result<lopdf::ObjectId, PdfError> {
        let img = decode_png(data)?;

        let mask_obj_id = match img.alpha {
            Some(mask_bytes) => {
                let mask_dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "ColorSpace" => "DeviceGray",
                    "Width" => lopdf::Object::Integer(img.width.into()),
                    "Height" => lopdf::Object::Integer(img.height.into()),
                    "BitsPerComponent" => lopdf::Object::Integer(8),
                    "Filter" => "FlateDecode",
                };
                let mask_obj = lopdf::Stream::new(mask_dict, deflate(&mask_bytes)?)
                    .with_compression(false);
                Some(self.inner_doc.add_object(mask_obj))
            }
            None => None,
        };

        let mut img_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "ColorSpace" => img.color_space,
            "Width" => lopdf::Object::Integer(img.width.into()),
            "Height" => lopdf::Object::Integer(img.height.into()),
            "BitsPerComponent" => lopdf::Object::Integer(8),
            "Filter" => "FlateDecode",
        };
        if let Some(mask_obj_id) = mask_obj_id {
            img_dict.set("SMask", lopdf::Object::Reference(mask_obj_id));
        }
        let img_obj = lopdf::Stream::new(img_dict, deflate(&img.pixels)?)
            .with_compression(false);

        Ok(self.inner_doc.add_object(img_obj))
    }

    fn append_audit_trail(&mut self, audit: &AuditTrail) -> Result<(), PdfError> {
        let size = match self.pages.values().next_back() {
            Some(last) => {
                let media_box = self.get_media_box(*last)?;
                (media_box.width(), media_box.height())
            }
            None => US_LETTER,
        };

        let mut writer = AuditWriter::new(size);
        writer.line(&format!("Document: {}", audit.title), AUDIT_MARGIN, 12.0, 0.0, AUDIT_LINE);
        writer.line(&format!("Completed: {}", audit.completed_at.format(TIMESTAMP_FORMAT)), AUDIT_MARGIN, 12.0, 0.0, AUDIT_LINE);
        writer.line(&format!("Original SHA-256: {}", audit.original_sha256), AUDIT_MARGIN, 9.0, 0.0, AUDIT_LINE * 2.0);
        writer.line("Signers:", AUDIT_MARGIN, 14.0, 0.0, AUDIT_LINE * 1.25);
        for signer in &audit.signers {
            writer.line(&format!("- {} ({})", signer.name, signer.email), 70.0, 11.0, 0.0, 18.0);
            let signed = match signer.signed_at {
                Some(at) => at.format(TIMESTAMP_FORMAT).to_string(),
                None => "not recorded".to_string(),
            };
            writer.line(&format!("Signed: {}", signed), 90.0, 10.0, 0.3, 15.0);
            if let Some(ip) = signer.ip {
                writer.line(&format!("IP: {}", ip), 90.0, 10.0, 0.3, 15.0);
            }
            writer.gap(AUDIT_LINE / 2.0);
        }

        let font_id = self.create_or_get_font_id();
        let pages_id = self.inner_doc.catalog()?.get(b"Pages")?.as_reference()?;
        for ops in writer.finish() {
            let content_id = self.inner_doc.add_object(lopdf::Stream::new(
                dictionary! {},
                lopdf::content::Content { operations: ops }.encode()?,
            ));
            let page_id = self.inner_doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![real(0.0), real(0.0), real(size.0), real(size.1)],
                "Resources" => dictionary! {
                    "Font" => dictionary! {
                        FONT_NAME => font_id,
                    },
                },
                "Contents" => content_id,
            });

            let pages = self.inner_doc.get_object_mut(pages_id)?.as_dict_mut()?;
            pages.get_mut(b"Kids")?.as_array_mut()?.push(lopdf::Object::Reference(page_id));
            let count = pages.get(b"Count").ok().and_then(number).unwrap_or(0.0) as i64;
            pages.set("Count", lopdf::Object::Integer(count + 1));

            let next = self.pages.keys().next_back().map(|n| n + 1).unwrap_or(1);
            self.pages.insert(next, page_id);
        }
        Ok(())
    }
}

/// Lays audit lines out top to bottom, starting a continuation page when the
/// bottom margin is reached.
struct AuditWriter {
    size: (f64, f64),
    pages: Vec<Vec<Operation>>,
    y: f64,
}

impl AuditWriter {
    fn new(size: (f64, f64)) -> Self {
        let mut writer = Self { size, pages: vec![], y: 0.0 };
        writer.new_page("Audit Trail");
        writer
    }

    fn new_page(&mut self, heading: &str) {
        let (_, height) = self.size;
        self.pages.push(text_ops(heading, AUDIT_MARGIN, height - AUDIT_MARGIN, 20.0, 0.0));
        self.y = height - AUDIT_TOP;
    }

    fn line(&mut self, text: &str, x: f64, size: f64, gray: f64, advance: f64) {
        if self.y < AUDIT_MARGIN {
            self.new_page("Audit Trail (continued)");
        }
        let ops = text_ops(text, x, self.y, size, gray);
        if let Some(page) = self.pages.last_mut() {
            page.extend(ops);
        }
        self.y -= advance;
    }

    fn gap(&mut self, advance: f64) {
        self.y -= advance;
    }

    fn finish(self) -> Vec<Vec<Operation>> {
        self.pages
    }
}
