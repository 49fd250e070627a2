use tracing::info;

use covenant_api::app;
use covenant_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    covenant_observability::init();

    let config = AppConfig::from_env()?;
    let address = config.bind_address();

    let (router, _services, _worker) = app::build(config).await?;

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}
