use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use quarry::application::{Application, Configuration};
use quarry::{Client, ClientOptions};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();

    Application::install_logging(&configuration);
    if color_eyre::install().is_err() {
        tracing::warn!("failed to install color-eyre, one is probably installed already");
    }

    let host = configuration.host.clone();
    let port = configuration.port;

    let client = Arc::new(Client::new(ClientOptions::with_configuration(configuration)).await?);
    let router = quarry::webserver::router(client.clone());

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "quarry listening");

    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await?;

    client.close().await.ok();
    Ok(())
}
