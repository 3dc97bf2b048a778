mod config;
mod error;
mod inference;
mod routes;

use actix_web::{App, HttpServer, middleware::Logger, web};
use config::ServiceConfig;
use inference::Predictor;
use inference::pipeline::Pipeline;
use routes::{AppState, configure_routes, cors};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = ServiceConfig::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    log::info!("Configuration version {}", config.version);
    log::debug!("Resolved configuration: {:?}", config);

    let pipeline = Pipeline::load(&config.models).await.map_err(|e| {
        log::error!("Failed to load models at startup: {}", e);
        std::io::Error::other(format!("Model loading failed: {}", e))
    })?;
    log::info!("Models loaded");

    let predictor: Arc<dyn Predictor> = Arc::new(pipeline);
    let state = web::Data::new(AppState::new(
        predictor,
        config.inference_permits(),
        Duration::from_secs(config.server.request_timeout_secs),
        config.server.max_upload_bytes,
    ));

    let bind_address = config.bind_address();
    log::info!(
        "Starting server on {} (at most {} concurrent inferences)",
        bind_address,
        config.inference_permits()
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors())
            .app_data(state.clone())
            .configure(configure_routes)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server.bind(&bind_address)?.run().await
}
