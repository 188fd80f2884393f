use sha2::Digest;
use serde::Serialize;
use crate::models;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("unable to render email: {0}")]
    Template(#[from] tera::Error),
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("unable to generate email: {0}")]
    Message(String),
    #[error("unable to deliver email: {0}")]
    Transport(String),
}

/// Outbound messages of the signing workflow. Delivery is best-effort;
/// callers log failures and carry on.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn signing_request(
        &self, document: &models::Document, recipient: &models::Recipient, signing_url: &str,
    ) -> Result<(), NotifyError>;

    async fn reminder(
        &self, document: &models::Document, recipient: &models::Recipient, signing_url: &str,
    ) -> Result<(), NotifyError>;

    async fn completed(
        &self, document: &models::Document, recipients: &[models::Recipient], signed_pdf: &[u8],
    ) -> Result<(), NotifyError>;
}

#[rocket::async_trait]
pub trait EmailTransport {
    async fn send(&self, msg: lettre::Message) -> Result<(), NotifyError>;
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::file::AsyncFileTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> Result<(), NotifyError> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(NotifyError::Transport(format!("unable to save email to file: {}", err)))
        }
    }
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::smtp::AsyncSmtpTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> Result<(), NotifyError> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(NotifyError::Transport(format!("unable to send email with SMTP: {}", err)))
        }
    }
}

pub type EmailTransportType = Box<dyn EmailTransport + Send + Sync>;

pub fn smtp_transport(
    conf: &crate::SMTPConfig,
) -> Result<lettre::transport::smtp::AsyncSmtpTransport<lettre::Tokio1Executor>, NotifyError> {
    let mut builder =
        lettre::transport::smtp::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(&conf.server)
            .port(conf.port);
    if conf.use_tls {
        let params = lettre::transport::smtp::client::TlsParameters::new(conf.server.clone())
            .map_err(|err| NotifyError::Transport(format!("unable to setup SMTP TLS parameters: {}", err)))?;
        builder = builder.tls(lettre::transport::smtp::client::Tls::Required(params));
    }
    if let Some(auth) = &conf.auth {
        builder = builder.credentials(
            lettre::transport::smtp::authentication::Credentials::new(
                auth.username.clone(), auth.password.clone()
            )
        )
    }
    Ok(builder.build())
}

fn templates() -> Result<tera::Tera, tera::Error> {
    let mut tera = tera::Tera::default();
    tera.add_raw_templates(vec![
        ("sig_request.html.tera", include_str!("../templates_email/sig_request.html.tera")),
        ("sig_request.txt.tera", include_str!("../templates_email/sig_request.txt.tera")),
        ("document_complete.html.tera", include_str!("../templates_email/document_complete.html.tera")),
        ("document_complete.txt.tera", include_str!("../templates_email/document_complete.txt.tera")),
    ])?;
    tera.autoescape_on(vec!["html.tera"]);
    Ok(tera)
}

#[derive(Serialize)]
struct SigRequestContext<'a> {
    document_title: &'a str,
    recipient_name: &'a str,
    message: Option<&'a str>,
    signature_url: &'a str,
    expiration_date: Option<String>,
    reminder: bool,
}

#[derive(Serialize)]
struct DocumentCompleteContext<'a> {
    document_title: &'a str,
    completed_at: Option<String>,
    doc_hash: String,
    signers: Vec<&'a str>,
}

/// Email notifier rendering `tera` templates and handing the messages to a
/// lettre transport.
pub struct Mailer {
    transport: EmailTransportType,
    templates: tera::Tera,
    from: lettre::message::Mailbox,
}

impl Mailer {
    pub fn new(transport: EmailTransportType, from: &str) -> Result<Self, NotifyError> {
        Ok(Self {
            transport,
            templates: templates()?,
            from: from.parse().map_err(NotifyError::Address)?,
        })
    }

    fn render(&self, name: &str, context: &impl Serialize) -> Result<(String, String), NotifyError> {
        let context = tera::Context::from_serialize(context)?;
        let email_html = self.templates.render(&format!("{}.html.tera", name), &context)?;
        let email_txt = self.templates.render(&format!("{}.txt.tera", name), &context)?;
        Ok((email_html, email_txt))
    }

    async fn request(
        &self, document: &models::Document, recipient: &models::Recipient, signing_url: &str, reminder: bool,
    ) -> Result<(), NotifyError> {
        let (email_html, email_txt) = self.render("sig_request", &SigRequestContext {
            document_title: &document.title,
            recipient_name: &recipient.name,
            message: document.message.as_deref(),
            signature_url: signing_url,
            expiration_date: document.expiration_date.map(|d| d.format(crate::pdf::TIMESTAMP_FORMAT).to_string()),
            reminder,
        })?;

        let subject = if reminder {
            format!("Reminder: please sign {}", document.title)
        } else {
            format!("Your signature requested on: {}", document.title)
        };

        let m = lettre::message::Message::builder()
            .from(self.from.clone())
            .to(lettre::message::Mailbox {
                name: Some(recipient.name.clone()),
                email: recipient.email.parse()?,
            })
            .subject(subject)
            .multipart(lettre::message::MultiPart::alternative_plain_html(email_txt, email_html))
            .map_err(|err| NotifyError::Message(err.to_string()))?;

        self.transport.send(m).await
    }
}

#[rocket::async_trait]
impl Notifier for Mailer {
    async fn signing_request(
        &self, document: &models::Document, recipient: &models::Recipient, signing_url: &str,
    ) -> Result<(), NotifyError> {
        self.request(document, recipient, signing_url, false).await
    }

    async fn reminder(
        &self, document: &models::Document, recipient: &models::Recipient, signing_url: &str,
    ) -> Result<(), NotifyError> {
        self.request(document, recipient, signing_url, true).await
    }

    async fn completed(
        &self, document: &models::Document, recipients: &[models::Recipient], signed_pdf: &[u8],
    ) -> Result<(), NotifyError> {
        let (email_html, email_txt) = self.render("document_complete", &DocumentCompleteContext {
            document_title: &document.title,
            completed_at: document.completed_at.map(|d| d.format(crate::pdf::TIMESTAMP_FORMAT).to_string()),
            doc_hash: hex::encode(sha2::Sha256::digest(signed_pdf)),
            signers: recipients.iter().map(|r| r.name.as_str()).collect(),
        })?;

        let pdf_type = lettre::message::header::ContentType::parse("application/pdf")
            .map_err(|err| NotifyError::Message(err.to_string()))?;

        // One message per recipient, each addressed to that recipient only.
        let mut failure = None;
        for recipient in recipients {
            let m = lettre::message::Message::builder()
                .from(self.from.clone())
                .to(lettre::message::Mailbox {
                    name: Some(recipient.name.clone()),
                    email: recipient.email.parse()?,
                })
                .subject(format!("Completed: {}", document.title))
                .multipart(lettre::message::MultiPart::mixed()
                    .multipart(lettre::message::MultiPart::alternative_plain_html(
                        email_txt.clone(), email_html.clone(),
                    ))
                    .singlepart(lettre::message::Attachment::new("signed-document.pdf".to_string()).body(
                        signed_pdf.to_vec(),
                        pdf_type.clone(),
                    ))
                ).map_err(|err| NotifyError::Message(err.to_string()))?;

            if let Err(err) = self.transport.send(m).await {
                warn!("Unable to send completed document {} to {}: {}", document.id, recipient.email, err);
                failure = Some(err);
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
