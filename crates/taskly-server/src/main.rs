use std::net::SocketAddr;
use std::sync::Arc;

use taskly_server::config::Config;
use taskly_server::routes;
use taskly_server::session::{SessionManager, TokenKeys};
use taskly_server::state::AppState;
use taskly_server::sweeper::ExpiredTokenSweeper;

async fn init_state(config: &Config) -> anyhow::Result<AppState> {
    let db = taskly_db::connect(&config.database_url).await?;

    // Creates missing tables on boot (idempotent).
    taskly_db::ensure_schema(&db).await?;

    let db = Arc::new(db);
    let keys = TokenKeys::new(
        config.jwt_secret.as_bytes(),
        config.refresh_token_secret.as_bytes(),
    )?;

    Ok(AppState {
        sessions: SessionManager::new(db.clone(), keys),
        db,
        secure_cookies: config.production,
        allowed_origins: Arc::from(config.allowed_origins.clone()),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::debug!(?config, "loaded configuration");

    let state = init_state(&config).await?;

    if let Some(interval) = config.sweep_interval {
        ExpiredTokenSweeper::new(state.sessions.clone(), interval).spawn();
    }

    let app = routes::router(state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    tracing::info!(%addr, "taskly HTTP listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
