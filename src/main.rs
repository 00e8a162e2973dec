use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quill::{app_state::AppState, config::Config, views};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let app_state = AppState::new(config.clone()).await?;
    let app = views::router(app_state);

    let addr = config.server_address();
    info!("server starting on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
