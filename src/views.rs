use std::net::IpAddr;
use rocket::data::ToByteUnit;
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use crate::catalog::NewPlacement;
use crate::completion::SubmitOutcome;
use crate::error::{Error, ErrorKind, Rejection};
use crate::intake::Submission;
use crate::ledger::NewRecipient;
use crate::models;
use crate::service::Esign;
use crate::session::{SessionStatus, SessionView};
use crate::status::{DocumentChanges, DocumentDetail, DocumentSummary, NewDocument, SentRecipient};

const MAX_PDF_SIZE: u64 = 10;
/// Signature images arrive as data URLs inside the JSON body.
pub const MAX_JSON_SIZE: u64 = 10;

/// Body limits the routes expect on top of Rocket's defaults.
pub fn limits() -> rocket::data::Limits {
    rocket::data::Limits::default().limit("json", MAX_JSON_SIZE.mebibytes())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_field: Option<String>,
}

fn error_status(err: &Error) -> Status {
    match err {
        Error::Expired => Status::Gone,
        Error::EmptyRecipients => Status::BadRequest,
        _ => match err.kind() {
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::AccessDenied => Status::Forbidden,
            ErrorKind::InvalidState => Status::Conflict,
            ErrorKind::Validation => Status::UnprocessableEntity,
            ErrorKind::TransientInfra => Status::ServiceUnavailable,
            ErrorKind::Internal => Status::InternalServerError,
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for Error {
    fn respond_to(self, request: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let status = error_status(&self);
        let error = if status.code >= 500 {
            error!("{} {}: {}", request.method(), request.uri(), self);
            match self.kind() {
                ErrorKind::TransientInfra => "temporarily unavailable, try again later".to_string(),
                _ => "internal server error".to_string(),
            }
        } else {
            debug!("{} {}: {}", request.method(), request.uri(), self);
            self.to_string()
        };
        let missing_field = match self {
            Error::MissingRequiredField(field) => Some(field),
            _ => None,
        };
        rocket::response::status::Custom(status, Json(ErrorBody { error, missing_field }))
            .respond_to(request)
    }
}

/// Maps IPv4-mapped and NAT64 addresses back to the IPv4 client.
pub fn fold_client_ip(ip: IpAddr, nat64_net: Option<ipnet::Ipv6Net>) -> IpAddr {
    if let IpAddr::V6(v6_ip) = ip {
        if let Some(v4_ip) = v6_ip.to_ipv4_mapped() {
            return IpAddr::V4(v4_ip);
        }
        if let Some(nat64_net) = nat64_net {
            if nat64_net.contains(&v6_ip) {
                let [_, _, _, _, _, _, ab, cd] = v6_ip.segments();
                let [a, b] = ab.to_be_bytes();
                let [c, d] = cd.to_be_bytes();
                return IpAddr::V4(std::net::Ipv4Addr::new(a, b, c, d));
            }
        }
    }
    ip
}

#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub ip: Option<IpAddr>,
}

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for ClientMeta {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r rocket::Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        let nat64_net = request.rocket().state::<crate::Config>().and_then(|c| c.nat64_net);
        rocket::request::Outcome::Success(ClientMeta {
            ip: request.client_ip().map(|ip| fold_client_ip(ip, nat64_net)),
        })
    }
}

/// The authenticated sender, as asserted by the upstream auth layer.
#[derive(Debug, Clone, Copy)]
pub struct SenderId(pub uuid::Uuid);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for SenderId {
    type Error = &'static str;

    async fn from_request(request: &'r rocket::Request<'_>) -> rocket::request::Outcome<Self, Self::Error> {
        match request.headers().get_one("X-Sender-Id").map(uuid::Uuid::parse_str) {
            Some(Ok(id)) => rocket::request::Outcome::Success(SenderId(id)),
            Some(Err(_)) => rocket::request::Outcome::Error((Status::BadRequest, "Invalid sender ID")),
            None => rocket::request::Outcome::Error((Status::Unauthorized, "Missing sender ID")),
        }
    }
}

async fn read_pdf(data: rocket::Data<'_>) -> Result<Vec<u8>, Status> {
    let body = match data.open(MAX_PDF_SIZE.mebibytes()).into_bytes().await {
        Ok(b) => b,
        Err(err) => {
            warn!("Unable to read upload: {}", err);
            return Err(Status::BadRequest);
        }
    };
    if !body.is_complete() {
        return Err(Status::PayloadTooLarge);
    }
    Ok(body.into_inner())
}

#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    Status(Status),
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        match self {
            ApiError::Domain(err) => err.respond_to(request),
            ApiError::Status(status) => status.respond_to(request),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Domain(err)
    }
}

impl From<Status> for ApiError {
    fn from(status: Status) -> Self {
        ApiError::Status(status)
    }
}

#[derive(Serialize)]
pub struct SubmitResponse {
    status: SubmitOutcome,
}

#[get("/sign/<token>")]
pub async fn session(token: &str, client: ClientMeta, esign: &rocket::State<Esign>) -> Result<Json<SessionView>, Error> {
    Ok(Json(esign.resolve_session(token, client.ip).await?))
}

#[post("/sign/<token>", data = "<data>", format = "application/json")]
pub async fn session_submit(
    token: &str, data: Json<Submission>, client: ClientMeta, esign: &rocket::State<Esign>,
) -> Result<Json<SubmitResponse>, Error> {
    let status = esign.submit_signatures(token, data.into_inner().signatures, client.ip).await?;
    Ok(Json(SubmitResponse { status }))
}

#[get("/sign/<token>/status")]
pub async fn session_status(token: &str, esign: &rocket::State<Esign>) -> Result<Json<SessionStatus>, Error> {
    Ok(Json(esign.session_status(token).await?))
}

#[post("/templates?<name>", data = "<data>", format = "application/pdf")]
pub async fn template_create(
    name: &str, data: rocket::Data<'_>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<models::Template>, ApiError> {
    let pdf = read_pdf(data).await?;
    Ok(Json(esign.create_template(sender.0, name, pdf).await?))
}

#[get("/templates")]
pub async fn template_list(sender: SenderId, esign: &rocket::State<Esign>) -> Result<Json<Vec<models::Template>>, Error> {
    Ok(Json(esign.templates(sender.0).await?))
}

#[get("/templates/<tid>")]
pub async fn template(tid: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>) -> Result<Json<models::Template>, Error> {
    Ok(Json(esign.template(sender.0, tid).await?))
}

#[delete("/templates/<tid>")]
pub async fn template_delete(tid: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>) -> Result<Status, Error> {
    esign.delete_template(sender.0, tid).await?;
    Ok(Status::NoContent)
}

#[get("/templates/<tid>/placements")]
pub async fn template_placements(
    tid: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<Vec<models::Placement>>, Error> {
    Ok(Json(esign.template_placements(sender.0, tid).await?))
}

#[put("/templates/<tid>/placements", data = "<data>", format = "application/json")]
pub async fn template_placements_replace(
    tid: uuid::Uuid, data: Json<Vec<NewPlacement>>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<Vec<models::Placement>>, Error> {
    Ok(Json(esign.replace_placements(sender.0, tid, data.into_inner()).await?))
}

#[put("/templates/<tid>/placements/<pid>", data = "<data>", format = "application/json")]
pub async fn template_placement_update(
    tid: uuid::Uuid, pid: uuid::Uuid, data: Json<NewPlacement>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<models::Placement>, Error> {
    Ok(Json(esign.update_placement(sender.0, tid, pid, data.into_inner()).await?))
}

#[delete("/templates/<tid>/placements/<pid>")]
pub async fn template_placement_delete(
    tid: uuid::Uuid, pid: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Status, Error> {
    esign.delete_placement(sender.0, tid, pid).await?;
    Ok(Status::NoContent)
}

#[get("/documents?<status>")]
pub async fn document_list(
    status: Option<&str>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<Vec<DocumentSummary>>, Error> {
    let status = status.map(|s| s.parse::<crate::schema::DocumentStatus>()).transpose()?;
    Ok(Json(esign.documents(sender.0, status).await?))
}

#[post("/documents", data = "<data>", format = "application/json")]
pub async fn document_create(
    data: Json<NewDocument>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<models::Document>, Error> {
    Ok(Json(esign.create_document(sender.0, data.into_inner(), None).await?))
}

#[post("/documents?<title>&<message>&<expiration_date>", data = "<data>", format = "application/pdf")]
pub async fn document_upload(
    title: &str, message: Option<&str>, expiration_date: Option<&str>, data: rocket::Data<'_>, sender: SenderId,
    esign: &rocket::State<Esign>,
) -> Result<Json<models::Document>, ApiError> {
    let expiration_date = match expiration_date {
        Some(date) => Some(
            chrono::DateTime::parse_from_rfc3339(date)
                .map_err(|_| Error::from(Rejection::InvalidDocument("expiration date is not an RFC 3339 timestamp")))?
                .with_timezone(&chrono::Utc),
        ),
        None => None,
    };
    let pdf = read_pdf(data).await?;
    let new = NewDocument {
        template_id: None,
        title: title.to_string(),
        message: message.map(str::to_string),
        expiration_date,
    };
    Ok(Json(esign.create_document(sender.0, new, Some(pdf)).await?))
}

#[get("/documents/<did>")]
pub async fn document(did: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>) -> Result<Json<DocumentDetail>, Error> {
    Ok(Json(esign.document_detail(sender.0, did).await?))
}

#[put("/documents/<did>", data = "<data>", format = "application/json")]
pub async fn document_update(
    did: uuid::Uuid, data: Json<DocumentChanges>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<models::Document>, Error> {
    Ok(Json(esign.update_document(sender.0, did, data.into_inner()).await?))
}

#[delete("/documents/<did>")]
pub async fn document_delete(did: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>) -> Result<Status, Error> {
    esign.delete_document(sender.0, did).await?;
    Ok(Status::NoContent)
}

#[get("/documents/<did>/recipients")]
pub async fn document_recipients(
    did: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<Vec<models::Recipient>>, Error> {
    Ok(Json(esign.document_recipients(sender.0, did).await?))
}

#[derive(Deserialize)]
pub struct SendRequest {
    recipients: Vec<NewRecipient>,
}

#[derive(Serialize)]
pub struct SendResponse {
    recipients: Vec<SentRecipient>,
}

#[post("/documents/<did>/send", data = "<data>", format = "application/json")]
pub async fn document_send(
    did: uuid::Uuid, data: Json<SendRequest>, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<SendResponse>, Error> {
    Ok(Json(SendResponse {
        recipients: esign.send_document(sender.0, did, data.into_inner().recipients).await?,
    }))
}

#[post("/documents/<did>/void")]
pub async fn document_void(did: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>) -> Result<Status, Error> {
    esign.void_document(sender.0, did).await?;
    Ok(Status::NoContent)
}

#[post("/documents/<did>/finalize")]
pub async fn document_finalize(
    did: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Json<SubmitResponse>, Error> {
    let status = esign.resume_completion(sender.0, did).await?;
    Ok(Json(SubmitResponse { status }))
}

#[derive(Serialize)]
pub struct DownloadLink {
    url: String,
}

#[get("/documents/<did>/download")]
pub async fn document_download(did: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>) -> Result<Json<DownloadLink>, Error> {
    Ok(Json(DownloadLink {
        url: esign.download_url(sender.0, did).await?,
    }))
}

#[post("/documents/<did>/remind/<rid>")]
pub async fn document_remind(
    did: uuid::Uuid, rid: uuid::Uuid, sender: SenderId, esign: &rocket::State<Esign>,
) -> Result<Status, Error> {
    esign.remind_recipient(sender.0, did, rid).await?;
    Ok(Status::NoContent)
}

#[get("/files/<file..>?<key>")]
pub async fn files(
    file: std::path::PathBuf, key: &str, esign: &rocket::State<Esign>,
) -> Result<(ContentType, Vec<u8>), Error> {
    let file_path = file.to_string_lossy().replace('\\', "/");
    let content_type = file.extension()
        .and_then(|e| e.to_str())
        .and_then(ContentType::from_extension)
        .unwrap_or(ContentType::Binary);
    Ok((content_type, esign.open_file(&file_path, key).await?))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        session,
        session_submit,
        session_status,
        template_create,
        template_list,
        template,
        template_delete,
        template_placements,
        template_placements_replace,
        template_placement_update,
        template_placement_delete,
        document_list,
        document_create,
        document_upload,
        document,
        document_update,
        document_delete,
        document_recipients,
        document_send,
        document_void,
        document_finalize,
        document_download,
        document_remind,
        files,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Header;
    use rocket::local::asynchronous::Client;
    use crate::schema::FieldType;
    use crate::testutil;

    #[test]
    fn client_addresses_are_folded() {
        let nat64: ipnet::Ipv6Net = "64:ff9b::/96".parse().unwrap();
        let mapped: IpAddr = "::ffff:192.0.2.1".parse().unwrap();
        assert_eq!(fold_client_ip(mapped, None), "192.0.2.1".parse::<IpAddr>().unwrap());

        let translated: IpAddr = "64:ff9b::c633:6407".parse().unwrap();
        assert_eq!(fold_client_ip(translated, Some(nat64)), "198.51.100.7".parse::<IpAddr>().unwrap());
        assert_eq!(fold_client_ip(translated, None), translated);

        let native: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(fold_client_ip(native, Some(nat64)), native);
    }

    #[test]
    fn statuses_follow_error_kinds() {
        assert_eq!(error_status(&Error::NotFound("document")), Status::NotFound);
        assert_eq!(error_status(&Error::AccessDenied), Status::Forbidden);
        assert_eq!(error_status(&Error::Expired), Status::Gone);
        assert_eq!(error_status(&Error::Voided), Status::Conflict);
        assert_eq!(error_status(&Error::EmptyRecipients), Status::BadRequest);
        assert_eq!(error_status(&Error::MissingRequiredField("x".into())), Status::UnprocessableEntity);
        assert_eq!(
            error_status(&Error::Blob(crate::blob::BlobError::Timeout("get".into()))),
            Status::ServiceUnavailable
        );
    }

    async fn client(h: testutil::Harness) -> Client {
        let config = rocket::Config {
            limits: limits(),
            ..rocket::Config::debug_default()
        };
        let rocket = rocket::custom(config)
            .manage(h.esign)
            .mount("/", routes());
        Client::tracked(rocket).await.unwrap()
    }

    #[tokio::test]
    async fn signing_over_http() {
        let h = testutil::harness();
        let seeded = testutil::seed(
            &h, 1,
            vec![testutil::field(FieldType::Text, 1, 100.0, "signer", true)],
            vec![testutil::signer("Ann", "ann@example.com", "signer")],
        ).await;
        let token = seeded.token("ann@example.com");
        let client = client(h).await;

        let res = client.get(format!("/sign/{}", token)).dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let view = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(view["recipient"]["status"], "viewed");
        assert_eq!(view["placements"][0]["fieldType"], "text");

        let res = client.post(format!("/sign/{}", token))
            .header(ContentType::JSON)
            .body(r#"{"signatures": []}"#)
            .dispatch().await;
        assert_eq!(res.status(), Status::UnprocessableEntity);
        let body = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["missingField"], "text");

        let res = client.post(format!("/sign/{}", token))
            .header(ContentType::JSON)
            .body(serde_json::json!({
                "signatures": [{"placementId": seeded.placements[0].id, "value": "Ann"}]
            }).to_string())
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let body = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["status"], "completed");

        let res = client.get(format!("/sign/{}/status", token)).dispatch().await;
        let body = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["documentStatus"], "completed");
    }

    #[tokio::test]
    async fn sender_routes_need_a_sender() {
        let h = testutil::harness();
        let doc = testutil::draft_document(None);
        crate::store::Store::insert_document(&*h.store, doc.clone()).await.unwrap();
        let client = client(h).await;

        let res = client.get(format!("/documents/{}", doc.id)).dispatch().await;
        assert_eq!(res.status(), Status::Unauthorized);

        let res = client.get(format!("/documents/{}", doc.id))
            .header(Header::new("X-Sender-Id", uuid::Uuid::new_v4().to_string()))
            .dispatch().await;
        assert_eq!(res.status(), Status::Forbidden);

        let res = client.get(format!("/documents/{}", doc.id))
            .header(Header::new("X-Sender-Id", doc.sender_id.to_string()))
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let body = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["status"], "draft");
        assert!(body.get("originalFile").is_none());
    }

    #[tokio::test]
    async fn upload_creates_a_draft() {
        let h = testutil::harness();
        let client = client(h).await;
        let sender = uuid::Uuid::new_v4();

        let res = client.post("/documents?title=Contract")
            .header(ContentType::PDF)
            .header(Header::new("X-Sender-Id", sender.to_string()))
            .body(testutil::blank_pdf(1))
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let doc = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(doc["title"], "Contract");

        let res = client.get(format!("/documents/{}/download", doc["id"].as_str().unwrap()))
            .header(Header::new("X-Sender-Id", sender.to_string()))
            .dispatch().await;
        let link = res.into_json::<serde_json::Value>().await.unwrap();
        let url = link["url"].as_str().unwrap().trim_start_matches("https://sign.example.com").to_string();

        let res = client.get(url).dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        assert_eq!(res.content_type(), Some(ContentType::PDF));
        assert_eq!(res.into_bytes().await.unwrap(), testutil::blank_pdf(1));
    }

    #[tokio::test]
    async fn large_signature_images_are_accepted() {
        let h = testutil::harness();
        let seeded = testutil::seed(
            &h, 1,
            vec![testutil::field(FieldType::Signature, 1, 100.0, "signer", true)],
            vec![testutil::signer("Ann", "ann@example.com", "signer")],
        ).await;
        let token = seeded.token("ann@example.com");
        let client = client(h).await;

        let body = serde_json::json!({
            "signatures": [{
                "placementId": seeded.placements[0].id,
                "signatureData": format!("data:image/png;base64,{}", base64::encode(testutil::noisy_png(600))),
            }]
        }).to_string();
        assert!(body.len() > 1024 * 1024);

        let res = client.post(format!("/sign/{}", token))
            .header(ContentType::JSON)
            .body(body)
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let body = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn sender_manages_templates_and_documents() {
        let h = testutil::harness();
        let client = client(h).await;
        let sender = Header::new("X-Sender-Id", uuid::Uuid::new_v4().to_string());

        let res = client.post("/templates?name=Lease")
            .header(ContentType::PDF)
            .header(sender.clone())
            .body(testutil::blank_pdf(1))
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let template = res.into_json::<serde_json::Value>().await.unwrap();
        let tid = template["id"].as_str().unwrap().to_string();

        let res = client.get("/templates").header(sender.clone()).dispatch().await;
        let templates = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(templates[0]["name"], "Lease");

        let res = client.put(format!("/templates/{}/placements", tid))
            .header(ContentType::JSON)
            .header(sender.clone())
            .body(serde_json::json!([
                {"fieldType": "signature", "pageNumber": 1, "x": 50, "y": 100, "width": 150, "height": 40, "recipientRole": "signer"},
                {"fieldType": "date", "pageNumber": 1, "x": 50, "y": 200, "width": 150, "height": 40, "recipientRole": "signer"},
            ]).to_string())
            .dispatch().await;
        let placements = res.into_json::<serde_json::Value>().await.unwrap();
        let first = placements[0]["id"].as_str().unwrap().to_string();
        let second = placements[1]["id"].as_str().unwrap().to_string();

        let res = client.put(format!("/templates/{}/placements/{}", tid, second))
            .header(ContentType::JSON)
            .header(sender.clone())
            .body(r#"{"fieldType": "text", "pageNumber": 1, "x": 60, "y": 300, "width": 100, "height": 20, "recipientRole": "signer", "label": "Title"}"#)
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let updated = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(updated["id"], second.as_str());
        assert_eq!(updated["label"], "Title");

        let res = client.delete(format!("/templates/{}/placements/{}", tid, first))
            .header(sender.clone())
            .dispatch().await;
        assert_eq!(res.status(), Status::NoContent);

        let res = client.post("/documents?title=Contract&expiration_date=2099-01-01T00:00:00Z")
            .header(ContentType::PDF)
            .header(sender.clone())
            .body(testutil::blank_pdf(1))
            .dispatch().await;
        assert_eq!(res.status(), Status::Ok);
        let doc = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(doc["expirationDate"], "2099-01-01T00:00:00Z");
        let did = doc["id"].as_str().unwrap().to_string();

        let res = client.get("/documents?status=draft").header(sender.clone()).dispatch().await;
        let drafts = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(drafts.as_array().unwrap().len(), 1);
        assert_eq!(drafts[0]["recipientCount"], 0);
        let res = client.get("/documents?status=lost").header(sender.clone()).dispatch().await;
        assert_eq!(res.status(), Status::UnprocessableEntity);

        let res = client.put(format!("/documents/{}", did))
            .header(ContentType::JSON)
            .header(sender.clone())
            .body(r#"{"title": "Signed contract"}"#)
            .dispatch().await;
        let doc = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(doc["title"], "Signed contract");

        let res = client.post(format!("/documents/{}/send", did))
            .header(ContentType::JSON)
            .header(sender.clone())
            .body(r#"{"recipients": [{"name": "Ann", "email": "ann@example.com"}]}"#)
            .dispatch().await;
        let sent = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(sent["recipients"], serde_json::json!([{"name": "Ann", "email": "ann@example.com"}]));

        let res = client.get(format!("/documents/{}/recipients", did)).header(sender.clone()).dispatch().await;
        let recipients = res.into_json::<serde_json::Value>().await.unwrap();
        assert_eq!(recipients[0]["status"], "pending");
        assert!(recipients[0].get("accessToken").is_none());

        let res = client.delete(format!("/documents/{}", did)).header(sender.clone()).dispatch().await;
        assert_eq!(res.status(), Status::Conflict);
        let res = client.post(format!("/documents/{}/void", did)).header(sender.clone()).dispatch().await;
        assert_eq!(res.status(), Status::NoContent);
        let res = client.delete(format!("/documents/{}", did)).header(sender.clone()).dispatch().await;
        assert_eq!(res.status(), Status::NoContent);

        let res = client.delete(format!("/templates/{}", tid)).header(sender.clone()).dispatch().await;
        assert_eq!(res.status(), Status::NoContent);
        let res = client.get(format!("/templates/{}", tid)).header(sender).dispatch().await;
        assert_eq!(res.status(), Status::NotFound);
    }
}
