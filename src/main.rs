use std::sync::Arc;

use atmark::api;
use atmark::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_dir = atmark::paths::default_config_dir();
    let state = Arc::new(AppState::initialize(config_dir.clone())?);

    let port = api::start_api_server(Arc::clone(&state)).await?;
    log::info!("api listening on 127.0.0.1:{port} (config dir: {})", config_dir.display());

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    Ok(())
}
