use std::env;
use std::time::Duration;

use anyhow::Result;
use mirgpt_agents::AssistantConfig;
use mirgpt_api::{build_router, build_state, run_housekeeping, ApiSettings};
use mirgpt_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("mirgpt_api");

    let config = AssistantConfig::from_env()?;
    let bind = env::var("MIRGPT_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let manual = config.manual_path.display().to_string();

    let state = build_state(config, ApiSettings::from_env()).await?;
    tokio::spawn(run_housekeeping(
        state.clone(),
        Duration::from_secs(15 * 60),
        chrono::Duration::hours(24),
    ));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, manual = %manual, "mirgpt api started");

    axum::serve(listener, app).await?;
    Ok(())
}
