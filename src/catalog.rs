//! Templates and the field placements drawn on them.

use chrono::Utc;
use serde::Deserialize;
use crate::error::{Error, Rejection, Result};
use crate::models::{Document, Placement, Template};
use crate::schema::FieldType;
use crate::service::Esign;
use crate::store::Edit;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlacement {
    pub field_type: FieldType,
    pub page_number: i32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub recipient_role: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Checks every placement against the template's page count and returns the
/// rows to store, in catalog order.
pub fn validate_placements(
    template_id: uuid::Uuid, page_count: u32, placements: Vec<NewPlacement>,
) -> Result<Vec<Placement>> {
    let mut out = Vec::with_capacity(placements.len());
    for (index, p) in placements.into_iter().enumerate() {
        let reason = if p.page_number < 1 {
            Some("page number must be at least 1")
        } else if p.page_number as u32 > page_count {
            Some("page number is beyond the end of the document")
        } else if !(p.x.is_finite() && p.y.is_finite()) || p.x < 0.0 || p.y < 0.0 {
            Some("position must be a non-negative number")
        } else if !(p.width.is_finite() && p.width > 0.0 && p.height.is_finite() && p.height > 0.0) {
            Some("width and height must be positive")
        } else if p.recipient_role.trim().is_empty() {
            Some("recipient role is required")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(Rejection::InvalidPlacement { index, reason }.into());
        }

        out.push(Placement {
            id: uuid::Uuid::new_v4(),
            template_id,
            field_type: p.field_type,
            page_number: p.page_number,
            x: p.x,
            y: p.y,
            width: p.width,
            height: p.height,
            recipient_role: p.recipient_role.trim().to_string(),
            required: p.required,
            label: p.label.filter(|l| !l.trim().is_empty()),
        });
    }
    out.sort_by(|a, b| {
        a.page_number.cmp(&b.page_number)
            .then(a.y.partial_cmp(&b.y).unwrap_or(std::cmp::Ordering::Equal))
    });
    Ok(out)
}

impl Esign {
    pub async fn create_template(&self, owner: uuid::Uuid, name: &str, pdf: Vec<u8>) -> Result<Template> {
        if name.trim().is_empty() {
            return Err(Rejection::InvalidDocument("template name is required").into());
        }
        let pages = match crate::pdf::page_count(&pdf) {
            Ok(p) if p > 0 => p,
            Ok(_) | Err(_) => return Err(Rejection::UnreadablePdf.into()),
        };

        let id = uuid::Uuid::new_v4();
        let template = Template {
            id,
            owner_id: owner,
            name: name.trim().to_string(),
            file: format!("templates/{}/original.pdf", id),
            created_at: Utc::now(),
        };
        self.blobs.put(&template.file, pdf).await?;
        self.store.insert_template(template.clone()).await?;
        info!("Created template {} ({} page(s))", template.id, pages);
        Ok(template)
    }

    async fn owned_template(&self, owner: uuid::Uuid, template_id: uuid::Uuid) -> Result<Template> {
        let template = self.store.template(template_id).await?
            .ok_or(Error::NotFound("template"))?;
        if template.owner_id != owner {
            return Err(Error::AccessDenied);
        }
        Ok(template)
    }

    pub async fn templates(&self, owner: uuid::Uuid) -> Result<Vec<Template>> {
        Ok(self.store.templates_for(owner).await?)
    }

    pub async fn template(&self, owner: uuid::Uuid, template_id: uuid::Uuid) -> Result<Template> {
        self.owned_template(owner, template_id).await
    }

    /// Removes a template nothing refers to any more, then its PDF.
    pub async fn delete_template(&self, owner: uuid::Uuid, template_id: uuid::Uuid) -> Result<()> {
        self.owned_template(owner, template_id).await?;
        let template = match self.store.delete_template(template_id).await? {
            Edit::Applied(template) => template,
            Edit::Missing => return Err(Error::NotFound("template")),
            Edit::Locked => return Err(Error::TemplateInUse),
        };
        info!("Deleted template {}", template_id);
        if let Err(err) = self.blobs.delete(&template.file).await {
            warn!("Unable to delete {}: {}", template.file, err);
        }
        Ok(())
    }

    pub async fn template_placements(&self, owner: uuid::Uuid, template_id: uuid::Uuid) -> Result<Vec<Placement>> {
        self.owned_template(owner, template_id).await?;
        Ok(self.store.placements(template_id).await?)
    }

    /// Swaps the template's whole placement set. Refused once a document made
    /// from the template has been sent.
    pub async fn replace_placements(
        &self, owner: uuid::Uuid, template_id: uuid::Uuid, placements: Vec<NewPlacement>,
    ) -> Result<Vec<Placement>> {
        let template = self.owned_template(owner, template_id).await?;
        let pdf = self.blobs.get(&template.file).await?;
        let page_count = crate::pdf::page_count(&pdf).map_err(|_| Rejection::UnreadablePdf)?;
        let placements = validate_placements(template_id, page_count, placements)?;

        if !self.store.replace_placements(template_id, placements.clone()).await? {
            return Err(Error::TemplateInUse);
        }
        debug!("Template {} now has {} placement(s)", template_id, placements.len());
        Ok(placements)
    }

    pub async fn update_placement(
        &self, owner: uuid::Uuid, template_id: uuid::Uuid, placement_id: uuid::Uuid, placement: NewPlacement,
    ) -> Result<Placement> {
        let template = self.owned_template(owner, template_id).await?;
        let pdf = self.blobs.get(&template.file).await?;
        let page_count = crate::pdf::page_count(&pdf).map_err(|_| Rejection::UnreadablePdf)?;
        let placement = validate_placements(template_id, page_count, vec![placement])?
            .into_iter()
            .next()
            .map(|p| Placement { id: placement_id, ..p })
            .ok_or_else(|| Error::Internal("placement validation returned nothing".to_string()))?;

        match self.store.update_placement(placement.clone()).await? {
            Edit::Applied(()) => Ok(placement),
            Edit::Missing => Err(Error::NotFound("placement")),
            Edit::Locked => Err(Error::TemplateInUse),
        }
    }

    pub async fn delete_placement(
        &self, owner: uuid::Uuid, template_id: uuid::Uuid, placement_id: uuid::Uuid,
    ) -> Result<()> {
        self.owned_template(owner, template_id).await?;
        match self.store.delete_placement(template_id, placement_id).await? {
            Edit::Applied(()) => Ok(()),
            Edit::Missing => Err(Error::NotFound("placement")),
            Edit::Locked => Err(Error::TemplateInUse),
        }
    }

    /// Every placement a document's signers see, in catalog order.
    pub(crate) async fn catalog_for(&self, document: &Document) -> Result<Vec<Placement>> {
        match document.template_id {
            Some(template_id) => Ok(self.store.placements(template_id).await?),
            None => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn placements_are_checked() {
        let template_id = uuid::Uuid::new_v4();
        let mut bad_page = testutil::field(FieldType::Signature, 0, 10.0, "signer", true);
        assert!(matches!(
            validate_placements(template_id, 2, vec![bad_page.clone()]),
            Err(Error::InvalidSubmission(Rejection::InvalidPlacement { index: 0, .. }))
        ));
        bad_page.page_number = 3;
        assert!(validate_placements(template_id, 2, vec![bad_page]).is_err());

        let mut flat = testutil::field(FieldType::Text, 1, 10.0, "signer", true);
        flat.height = 0.0;
        let ok = testutil::field(FieldType::Text, 1, 10.0, "signer", true);
        assert!(matches!(
            validate_placements(template_id, 2, vec![ok, flat]),
            Err(Error::InvalidSubmission(Rejection::InvalidPlacement { index: 1, .. }))
        ));

        let nameless = testutil::field(FieldType::Text, 1, 10.0, "  ", true);
        assert!(validate_placements(template_id, 2, vec![nameless]).is_err());
    }

    #[test]
    fn placements_are_ordered_by_page_then_top() {
        let template_id = uuid::Uuid::new_v4();
        let placements = validate_placements(template_id, 2, vec![
            testutil::field(FieldType::Date, 2, 50.0, "signer", true),
            testutil::field(FieldType::Text, 1, 300.0, "signer", true),
            testutil::field(FieldType::Signature, 1, 100.0, "signer", true),
        ]).unwrap();
        let order = placements.iter().map(|p| (p.page_number, p.y)).collect::<Vec<_>>();
        assert_eq!(order, vec![(1, 100.0), (1, 300.0), (2, 50.0)]);
        assert!(placements.iter().all(|p| p.template_id == template_id));
    }

    #[tokio::test]
    async fn template_needs_a_readable_pdf() {
        let h = testutil::harness();
        let owner = uuid::Uuid::new_v4();
        assert!(matches!(
            h.esign.create_template(owner, "Lease", b"not a pdf".to_vec()).await,
            Err(Error::InvalidSubmission(Rejection::UnreadablePdf))
        ));

        let template = h.esign.create_template(owner, "Lease", testutil::blank_pdf(1)).await.unwrap();
        assert_eq!(h.blobs.keys().await, vec![template.file.clone()]);
    }

    #[tokio::test]
    async fn placements_belong_to_the_owner() {
        let h = testutil::harness();
        let owner = uuid::Uuid::new_v4();
        let template = h.esign.create_template(owner, "Lease", testutil::blank_pdf(1)).await.unwrap();
        let fields = vec![testutil::field(FieldType::Signature, 1, 100.0, "signer", true)];

        assert!(matches!(
            h.esign.replace_placements(uuid::Uuid::new_v4(), template.id, fields.clone()).await,
            Err(Error::AccessDenied)
        ));
        let stored = h.esign.replace_placements(owner, template.id, fields).await.unwrap();
        assert_eq!(h.esign.template_placements(owner, template.id).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn sent_templates_are_frozen() {
        let h = testutil::harness();
        let seeded = testutil::seed(
            &h, 1,
            vec![testutil::field(FieldType::Signature, 1, 100.0, "signer", true)],
            vec![testutil::signer("Ann", "ann@example.com", "signer")],
        ).await;
        let template_id = seeded.document.template_id.unwrap();

        let res = h.esign.replace_placements(seeded.document.sender_id, template_id, vec![]).await;
        assert!(matches!(res, Err(Error::TemplateInUse)));
        assert_eq!(h.esign.catalog_for(&seeded.document).await.unwrap(), seeded.placements);
    }

    #[tokio::test]
    async fn templates_are_listed_per_owner() {
        let h = testutil::harness();
        let owner = uuid::Uuid::new_v4();
        let lease = h.esign.create_template(owner, "Lease", testutil::blank_pdf(1)).await.unwrap();
        h.esign.create_template(uuid::Uuid::new_v4(), "Other", testutil::blank_pdf(1)).await.unwrap();

        assert_eq!(h.esign.templates(owner).await.unwrap(), vec![lease.clone()]);
        assert_eq!(h.esign.template(owner, lease.id).await.unwrap(), lease);
        assert!(matches!(h.esign.template(uuid::Uuid::new_v4(), lease.id).await, Err(Error::AccessDenied)));
        assert!(matches!(h.esign.template(owner, uuid::Uuid::new_v4()).await, Err(Error::NotFound("template"))));
    }

    #[tokio::test]
    async fn one_placement_can_be_moved_or_dropped() {
        let h = testutil::harness();
        let owner = uuid::Uuid::new_v4();
        let template = h.esign.create_template(owner, "Lease", testutil::blank_pdf(2)).await.unwrap();
        let stored = h.esign.replace_placements(owner, template.id, vec![
            testutil::field(FieldType::Signature, 1, 100.0, "signer", true),
            testutil::field(FieldType::Date, 1, 200.0, "signer", true),
        ]).await.unwrap();

        let moved = h.esign.update_placement(
            owner, template.id, stored[1].id, testutil::field(FieldType::Date, 2, 50.0, "signer", false),
        ).await.unwrap();
        assert_eq!(moved.id, stored[1].id);
        assert_eq!((moved.page_number, moved.required), (2, false));
        assert!(matches!(
            h.esign.update_placement(owner, template.id, stored[0].id, testutil::field(FieldType::Date, 3, 50.0, "signer", true)).await,
            Err(Error::InvalidSubmission(Rejection::InvalidPlacement { .. }))
        ));
        assert!(matches!(
            h.esign.update_placement(owner, template.id, uuid::Uuid::new_v4(), testutil::field(FieldType::Date, 1, 50.0, "signer", true)).await,
            Err(Error::NotFound("placement"))
        ));

        h.esign.delete_placement(owner, template.id, stored[0].id).await.unwrap();
        assert_eq!(h.esign.template_placements(owner, template.id).await.unwrap(), vec![moved]);
        assert!(matches!(
            h.esign.delete_placement(uuid::Uuid::new_v4(), template.id, stored[1].id).await,
            Err(Error::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn sent_templates_keep_their_placements_and_file() {
        let h = testutil::harness();
        let seeded = testutil::seed(
            &h, 1,
            vec![testutil::field(FieldType::Signature, 1, 100.0, "signer", true)],
            vec![testutil::signer("Ann", "ann@example.com", "signer")],
        ).await;
        let owner = seeded.document.sender_id;
        let template_id = seeded.document.template_id.unwrap();
        let placement = seeded.placements[0].id;

        assert!(matches!(h.esign.delete_placement(owner, template_id, placement).await, Err(Error::TemplateInUse)));
        assert!(matches!(
            h.esign.update_placement(owner, template_id, placement, testutil::field(FieldType::Text, 1, 10.0, "signer", true)).await,
            Err(Error::TemplateInUse)
        ));
        assert!(matches!(h.esign.delete_template(owner, template_id).await, Err(Error::TemplateInUse)));
        assert_eq!(h.esign.catalog_for(&seeded.document).await.unwrap(), seeded.placements);
    }

    #[tokio::test]
    async fn unused_template_is_deleted_with_its_file() {
        let h = testutil::harness();
        let owner = uuid::Uuid::new_v4();
        let template = h.esign.create_template(owner, "Lease", testutil::blank_pdf(1)).await.unwrap();

        assert!(matches!(h.esign.delete_template(uuid::Uuid::new_v4(), template.id).await, Err(Error::AccessDenied)));
        h.esign.delete_template(owner, template.id).await.unwrap();
        assert!(h.blobs.keys().await.is_empty());
        assert!(matches!(h.esign.delete_template(owner, template.id).await, Err(Error::NotFound("template"))));
    }
}
