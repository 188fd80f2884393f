use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use crate::models::{self, Document, Placement, Recipient, Signature, Template};
use crate::schema::{self, DocumentStatus, RecipientStatus};
use crate::store::{DocumentListing, Edit, Store, StoreError, StoreResult};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub type DbPool = r2d2::Pool<diesel::r2d2::ConnectionManager<diesel::PgConnection>>;

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            err => StoreError::Database(err.to_string()),
        }
    }
}

pub fn make_pool(database_url: &str) -> StoreResult<DbPool> {
    let manager = diesel::r2d2::ConnectionManager::<diesel::PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .build(manager)
        .map_err(|err| StoreError::Pool(err.to_string()))
}

pub fn run_migrations(pool: &DbPool) -> StoreResult<()> {
    let mut c = pool.get().map_err(|err| StoreError::Pool(err.to_string()))?;
    let applied = c.run_pending_migrations(MIGRATIONS)
        .map_err(|err| StoreError::Database(format!("unable to run migrations: {}", err)))?;
    for version in applied {
        info!("Applied migration {}", version);
    }
    Ok(())
}

/// Postgres backed store. Queries run on the pooled connection inside
/// `block_in_place`, so callers must be on a multi-threaded runtime.
#[derive(Clone)]
pub struct PgStore {
    pool: std::sync::Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool: std::sync::Arc::new(pool),
        }
    }

    fn run<T, F>(&self, func: F) -> StoreResult<T>
    where
        F: FnOnce(&mut diesel::PgConnection) -> StoreResult<T>,
    {
        let db_pool = self.pool.clone();
        tokio::task::block_in_place(move || {
            let mut c = db_pool.get().map_err(|err| {
                StoreError::Pool(err.to_string())
            })?;
            func(&mut c)
        })
    }
}

fn template_in_use(c: &mut diesel::PgConnection, template_id: uuid::Uuid) -> QueryResult<bool> {
    diesel::select(diesel::dsl::exists(
        schema::documents::dsl::documents
            .filter(schema::documents::dsl::template_id.eq(template_id))
            .filter(schema::documents::dsl::status.ne(DocumentStatus::Draft))
    )).get_result::<bool>(c)
}

#[rocket::async_trait]
impl Store for PgStore {
    async fn insert_template(&self, template: Template) -> StoreResult<()> {
        self.run(move |c| {
            diesel::insert_into(schema::templates::dsl::templates)
                .values(&template)
                .execute(c)?;
            Ok(())
        })
    }

    async fn template(&self, id: uuid::Uuid) -> StoreResult<Option<Template>> {
        self.run(move |c| {
            Ok(schema::templates::dsl::templates.find(id).first::<Template>(c).optional()?)
        })
    }

    async fn templates_for(&self, owner_id: uuid::Uuid) -> StoreResult<Vec<Template>> {
        self.run(move |c| {
            Ok(schema::templates::dsl::templates
                .filter(schema::templates::dsl::owner_id.eq(owner_id))
                .order(schema::templates::dsl::created_at.desc())
                .load::<Template>(c)?)
        })
    }

    async fn delete_template(&self, template_id: uuid::Uuid) -> StoreResult<Edit<Template>> {
        self.run(move |c| {
            c.transaction(|c| -> Result<Edit<Template>, StoreError> {
                let template = match schema::templates::dsl::templates
                    .find(template_id)
                    .for_update()
                    .first::<Template>(c)
                    .optional()? {
                    Some(t) => t,
                    None => return Ok(Edit::Missing),
                };
                let referenced = diesel::select(diesel::dsl::exists(
                    schema::documents::dsl::documents
                        .filter(schema::documents::dsl::template_id.eq(template_id))
                )).get_result::<bool>(c)?;
                if referenced {
                    return Ok(Edit::Locked);
                }
                diesel::delete(schema::templates::dsl::templates.find(template_id)).execute(c)?;
                Ok(Edit::Applied(template))
            })
        })
    }

    async fn placements(&self, template_id: uuid::Uuid) -> StoreResult<Vec<Placement>> {
        self.run(move |c| {
            Ok(schema::placements::dsl::placements
                .filter(schema::placements::dsl::template_id.eq(template_id))
                .order((schema::placements::dsl::page_number.asc(), schema::placements::dsl::y.asc()))
                .load::<Placement>(c)?)
        })
    }

    async fn replace_placements(&self, template_id: uuid::Uuid, placements: Vec<Placement>) -> StoreResult<bool> {
        self.run(move |c| {
            c.transaction(|c| -> Result<bool, StoreError> {
                if template_in_use(c, template_id)? {
                    return Ok(false);
                }
                diesel::delete(schema::placements::dsl::placements.filter(
                    schema::placements::dsl::template_id.eq(template_id)
                )).execute(c)?;
                diesel::insert_into(schema::placements::dsl::placements)
                    .values(&placements)
                    .execute(c)?;
                Ok(true)
            })
        })
    }

    async fn update_placement(&self, placement: Placement) -> StoreResult<Edit> {
        self.run(move |c| {
            c.transaction(|c| -> Result<Edit, StoreError> {
                if template_in_use(c, placement.template_id)? {
                    return Ok(Edit::Locked);
                }
                let updated = diesel::update(schema::placements::dsl::placements
                    .filter(schema::placements::dsl::id.eq(placement.id))
                    .filter(schema::placements::dsl::template_id.eq(placement.template_id))
                )
                    .set((
                        schema::placements::dsl::field_type.eq(placement.field_type),
                        schema::placements::dsl::page_number.eq(placement.page_number),
                        schema::placements::dsl::x.eq(placement.x),
                        schema::placements::dsl::y.eq(placement.y),
                        schema::placements::dsl::width.eq(placement.width),
                        schema::placements::dsl::height.eq(placement.height),
                        schema::placements::dsl::recipient_role.eq(&placement.recipient_role),
                        schema::placements::dsl::required.eq(placement.required),
                        schema::placements::dsl::label.eq(&placement.label),
                    ))
                    .execute(c)?;
                Ok(if updated > 0 { Edit::Applied(()) } else { Edit::Missing })
            })
        })
    }

    async fn delete_placement(&self, template_id: uuid::Uuid, placement_id: uuid::Uuid) -> StoreResult<Edit> {
        self.run(move |c| {
            c.transaction(|c| -> Result<Edit, StoreError> {
                if template_in_use(c, template_id)? {
                    return Ok(Edit::Locked);
                }
                let deleted = diesel::delete(schema::placements::dsl::placements
                    .filter(schema::placements::dsl::id.eq(placement_id))
                    .filter(schema::placements::dsl::template_id.eq(template_id))
                ).execute(c)?;
                Ok(if deleted > 0 { Edit::Applied(()) } else { Edit::Missing })
            })
        })
    }

    async fn insert_document(&self, document: Document) -> StoreResult<()> {
        self.run(move |c| {
            diesel::insert_into(schema::documents::dsl::documents)
                .values(&document)
                .execute(c)?;
            Ok(())
        })
    }

    async fn document(&self, id: uuid::Uuid) -> StoreResult<Option<Document>> {
        self.run(move |c| {
            Ok(schema::documents::dsl::documents.find(id).first::<Document>(c).optional()?)
        })
    }

    async fn documents_for(&self, sender_id: uuid::Uuid) -> StoreResult<Vec<DocumentListing>> {
        self.run(move |c| {
            let documents = schema::documents::dsl::documents
                .filter(schema::documents::dsl::sender_id.eq(sender_id))
                .order(schema::documents::dsl::created_at.desc())
                .load::<Document>(c)?;
            let ids = documents.iter().map(|d| d.id).collect::<Vec<_>>();
            let statuses = schema::recipients::dsl::recipients
                .filter(schema::recipients::dsl::document_id.eq_any(ids))
                .select((schema::recipients::dsl::document_id, schema::recipients::dsl::status))
                .load::<(uuid::Uuid, RecipientStatus)>(c)?;

            Ok(documents.into_iter().map(|document| {
                let of_document = statuses.iter().filter(|(id, _)| *id == document.id);
                DocumentListing {
                    recipients: of_document.clone().count(),
                    signed: of_document.filter(|(_, s)| *s == RecipientStatus::Completed).count(),
                    document,
                }
            }).collect())
        })
    }

    async fn update_draft(&self, document: Document) -> StoreResult<Edit> {
        self.run(move |c| {
            c.transaction(|c| -> Result<Edit, StoreError> {
                let updated = diesel::update(schema::documents::dsl::documents
                    .filter(schema::documents::dsl::id.eq(document.id))
                    .filter(schema::documents::dsl::status.eq(DocumentStatus::Draft))
                )
                    .set((
                        schema::documents::dsl::title.eq(&document.title),
                        schema::documents::dsl::message.eq(&document.message),
                        schema::documents::dsl::expiration_date.eq(document.expiration_date),
                    ))
                    .execute(c)?;
                if updated > 0 {
                    return Ok(Edit::Applied(()));
                }
                let exists = diesel::select(diesel::dsl::exists(
                    schema::documents::dsl::documents.find(document.id)
                )).get_result::<bool>(c)?;
                Ok(if exists { Edit::Locked } else { Edit::Missing })
            })
        })
    }

    async fn delete_document(&self, document_id: uuid::Uuid, now: DateTime<Utc>) -> StoreResult<Edit<Document>> {
        self.run(move |c| {
            c.transaction(|c| -> Result<Edit<Document>, StoreError> {
                let document = match schema::documents::dsl::documents
                    .find(document_id)
                    .for_update()
                    .first::<Document>(c)
                    .optional()? {
                    Some(d) => d,
                    None => return Ok(Edit::Missing),
                };
                if document.status == DocumentStatus::Sent && !document.is_expired(now) {
                    return Ok(Edit::Locked);
                }
                diesel::delete(schema::documents::dsl::documents.find(document_id)).execute(c)?;
                Ok(Edit::Applied(document))
            })
        })
    }

    async fn recipient_by_token(&self, token: &str) -> StoreResult<Option<Recipient>> {
        let token = token.to_string();
        self.run(move |c| {
            Ok(schema::recipients::dsl::recipients
                .filter(schema::recipients::dsl::access_token.eq(token))
                .first::<Recipient>(c)
                .optional()?)
        })
    }

    async fn recipients(&self, document_id: uuid::Uuid) -> StoreResult<Vec<Recipient>> {
        self.run(move |c| {
            Ok(schema::recipients::dsl::recipients
                .filter(schema::recipients::dsl::document_id.eq(document_id))
                .order(schema::recipients::dsl::signing_order.asc())
                .load::<Recipient>(c)?)
        })
    }

    async fn send_document(
        &self, document_id: uuid::Uuid, recipients: Vec<Recipient>, sent_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.run(move |c| {
            c.transaction(|c| -> Result<bool, StoreError> {
                let updated = diesel::update(schema::documents::dsl::documents
                    .filter(schema::documents::dsl::id.eq(document_id))
                    .filter(schema::documents::dsl::status.eq(DocumentStatus::Draft))
                )
                    .set((
                        schema::documents::dsl::status.eq(DocumentStatus::Sent),
                        schema::documents::dsl::sent_at.eq(Some(sent_at)),
                    ))
                    .execute(c)?;
                if updated == 0 {
                    return Ok(false);
                }
                diesel::insert_into(schema::recipients::dsl::recipients)
                    .values(&recipients)
                    .execute(c)?;
                Ok(true)
            })
        })
    }

    async fn mark_viewed(
        &self, recipient_id: uuid::Uuid, at: DateTime<Utc>, ip: Option<ipnetwork::IpNetwork>,
    ) -> StoreResult<bool> {
        self.run(move |c| {
            let target = schema::recipients::dsl::recipients
                .filter(schema::recipients::dsl::id.eq(recipient_id))
                .filter(schema::recipients::dsl::status.eq(RecipientStatus::Pending));
            let updated = match ip {
                Some(ip) => diesel::update(target)
                    .set((
                        schema::recipients::dsl::status.eq(RecipientStatus::Viewed),
                        schema::recipients::dsl::viewed_at.eq(Some(at)),
                        schema::recipients::dsl::ip_address.eq(Some(ip)),
                    ))
                    .execute(c)?,
                None => diesel::update(target)
                    .set((
                        schema::recipients::dsl::status.eq(RecipientStatus::Viewed),
                        schema::recipients::dsl::viewed_at.eq(Some(at)),
                    ))
                    .execute(c)?,
            };
            Ok(updated > 0)
        })
    }

    async fn record_signatures(
        &self, recipient_id: uuid::Uuid, signatures: Vec<Signature>, signed_at: DateTime<Utc>,
        ip: Option<ipnetwork::IpNetwork>,
    ) -> StoreResult<bool> {
        let rows = signatures.iter().map(models::SignatureRow::from).collect::<Vec<_>>();
        self.run(move |c| {
            c.transaction(|c| -> Result<bool, StoreError> {
                let target = schema::recipients::dsl::recipients
                    .filter(schema::recipients::dsl::id.eq(recipient_id))
                    .filter(schema::recipients::dsl::status.ne(RecipientStatus::Completed));
                let updated = match ip {
                    Some(ip) => diesel::update(target)
                        .set((
                            schema::recipients::dsl::status.eq(RecipientStatus::Completed),
                            schema::recipients::dsl::signed_at.eq(Some(signed_at)),
                            schema::recipients::dsl::ip_address.eq(Some(ip)),
                        ))
                        .execute(c)?,
                    None => diesel::update(target)
                        .set((
                            schema::recipients::dsl::status.eq(RecipientStatus::Completed),
                            schema::recipients::dsl::signed_at.eq(Some(signed_at)),
                        ))
                        .execute(c)?,
                };
                if updated == 0 {
                    return Ok(false);
                }
                diesel::insert_into(schema::signatures::dsl::signatures)
                    .values(&rows)
                    .execute(c)?;
                Ok(true)
            })
        })
    }

    async fn signatures(&self, document_id: uuid::Uuid) -> StoreResult<Vec<Signature>> {
        self.run(move |c| {
            schema::signatures::dsl::signatures
                .filter(schema::signatures::dsl::document_id.eq(document_id))
                .order(schema::signatures::dsl::created_at.asc())
                .load::<models::SignatureRow>(c)?
                .into_iter()
                .map(Signature::try_from)
                .collect()
        })
    }

    async fn recipient_signatures(&self, recipient_id: uuid::Uuid) -> StoreResult<Vec<Signature>> {
        self.run(move |c| {
            schema::signatures::dsl::signatures
                .filter(schema::signatures::dsl::recipient_id.eq(recipient_id))
                .order(schema::signatures::dsl::created_at.asc())
                .load::<models::SignatureRow>(c)?
                .into_iter()
                .map(Signature::try_from)
                .collect()
        })
    }

    async fn complete_document(
        &self, document_id: uuid::Uuid, signed_file: String, completed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.run(move |c| {
            let updated = diesel::update(schema::documents::dsl::documents
                .filter(schema::documents::dsl::id.eq(document_id))
                .filter(schema::documents::dsl::status.eq(DocumentStatus::Sent))
            )
                .set((
                    schema::documents::dsl::status.eq(DocumentStatus::Completed),
                    schema::documents::dsl::signed_file.eq(Some(signed_file)),
                    schema::documents::dsl::completed_at.eq(Some(completed_at)),
                ))
                .execute(c)?;
            Ok(updated > 0)
        })
    }

    async fn void_document(&self, document_id: uuid::Uuid) -> StoreResult<bool> {
        self.run(move |c| {
            let updated = diesel::update(schema::documents::dsl::documents
                .filter(schema::documents::dsl::id.eq(document_id))
                .filter(schema::documents::dsl::status.eq_any(vec![DocumentStatus::Draft, DocumentStatus::Sent]))
            )
                .set(schema::documents::dsl::status.eq(DocumentStatus::Voided))
                .execute(c)?;
            Ok(updated > 0)
        })
    }
}
