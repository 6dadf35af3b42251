use anyhow::Result;
use invest_platform::{AppState, Config, init_pool, init_router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{
    EnvFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let pool = init_pool(&config).await?;

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    let app = init_router(AppState { pool, config });

    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
