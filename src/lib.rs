#![crate_type = "rlib"]

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate diesel_derive_enum;
#[macro_use]
extern crate diesel_migrations;
#[macro_use]
extern crate lopdf;

use std::sync::Arc;
use serde::Deserialize;

pub mod error;
pub mod schema;
pub mod models;
pub mod store;
pub mod db;
pub mod blob;
pub mod files;
pub mod catalog;
pub mod ledger;
pub mod status;
pub mod session;
pub mod intake;
pub mod completion;
pub mod pdf;
pub mod notify;
pub mod service;
pub mod views;
#[cfg(test)]
mod testutil;

pub use service::Esign;

#[derive(Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "from_base64")]
    files_key: Vec<u8>,
    external_uri: String,
    database_url: String,
    #[serde(default = "default_files_dir")]
    files_dir: String,
    #[serde(default = "default_link_ttl")]
    link_ttl_secs: i64,
    #[serde(default = "default_blob_timeout")]
    blob_timeout_secs: u64,
    mail_from: String,
    #[serde(default)]
    smtp: Option<SMTPConfig>,
    #[serde(default)]
    nat64_net: Option<ipnet::Ipv6Net>,
}

fn default_files_dir() -> String {
    "./files/".to_string()
}

fn default_link_ttl() -> i64 {
    3600
}

fn default_blob_timeout() -> u64 {
    30
}

#[derive(Deserialize, Clone)]
pub struct SMTPConfig {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub auth: Option<SMTPAuth>
}

#[derive(Deserialize, Clone)]
pub struct SMTPAuth {
    pub username: String,
    pub password: String,
}

fn from_base64<'a, D: serde::Deserializer<'a>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    use serde::de::Error;
    String::deserialize(deserializer)
        .and_then(|string| base64::decode(&string).map_err(|err| Error::custom(err.to_string())))
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unable to read config: {0}")]
    Config(#[from] figment::Error),
    #[error("unable to setup database: {0}")]
    Store(#[from] store::StoreError),
    #[error("unable to setup file storage: {0}")]
    Blob(#[from] blob::BlobError),
    #[error("unable to setup email: {0}")]
    Notify(#[from] notify::NotifyError),
    #[error("invalid files key: {0}")]
    FilesKey(#[from] files::FileKeyError),
}

pub struct App {
    pub rocket: rocket::Rocket<rocket::Build>,
    pub external_uri: String,
}

/// Rocket's own configuration sources, on top of this crate's default limits.
fn figment() -> rocket::figment::Figment {
    use rocket::figment::providers::{Env, Format, Toml};
    let defaults = rocket::Config {
        limits: views::limits(),
        ..rocket::Config::default()
    };
    rocket::figment::Figment::from(defaults)
        .merge(Toml::file(Env::var_or("ROCKET_CONFIG", "Rocket.toml")).nested())
        .merge(Env::prefixed("ROCKET_").ignore(&["PROFILE"]).global())
        .select(rocket::figment::Profile::from_env_or("ROCKET_PROFILE", rocket::Config::DEFAULT_PROFILE))
}

pub async fn setup() -> Result<App, SetupError> {
    let rocket = rocket::custom(figment());
    let figment = rocket.figment();
    let config = figment.extract::<Config>()?;

    let db_pool = db::make_pool(&config.database_url)?;
    db::run_migrations(&db_pool)?;
    let store = Arc::new(db::PgStore::new(db_pool));

    let blobs = Arc::new(blob::LocalBlobStore::new(&config.files_dir).await?);

    let transport: notify::EmailTransportType = match &config.smtp {
        Some(smtp) => {
            info!("Sending email through {}:{}", smtp.server, smtp.port);
            Box::new(notify::smtp_transport(smtp)?)
        }
        None => {
            let outbox = std::path::Path::new(&config.files_dir).join("outbox");
            tokio::fs::create_dir_all(&outbox).await.map_err(blob::BlobError::Io)?;
            warn!("No SMTP server configured, writing email to {}", outbox.display());
            Box::new(lettre::transport::file::AsyncFileTransport::<lettre::Tokio1Executor>::new(outbox))
        }
    };
    let mailer = Arc::new(notify::Mailer::new(transport, &config.mail_from)?);

    let esign = Esign::new(store, blobs, mailer, service::Settings {
        files_key: config.files_key.clone(),
        external_uri: config.external_uri.clone(),
        link_ttl: chrono::Duration::seconds(config.link_ttl_secs),
        blob_timeout: std::time::Duration::from_secs(config.blob_timeout_secs),
    })?;

    Ok(App {
        external_uri: config.external_uri.clone(),
        rocket: rocket.manage(config).manage(esign),
    })
}
