#[macro_use]
extern crate log;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let app = esign::setup().await?;

    info!("eSign frontend starting on {}...", app.external_uri);

    app.rocket
        .mount("/", esign::views::routes())
        .launch()
        .await?;
    Ok(())
}
