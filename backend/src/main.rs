use std::env;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use deeptrust::routes::{configure_routes, ApiState};
use deeptrust::{ArtifactStore, InferenceContext, Orchestrator, PipelineConfig};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    } else {
        log::error!("Failed to get the current working directory.");
    }

    let config = PipelineConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::other(e)
    })?;
    log::info!("Configuration: {:?}", config);

    let context = InferenceContext::from_config(&config).map_err(|e| {
        log::error!("Failed to initialise models at startup: {}", e);
        std::io::Error::other(e)
    })?;

    let store = ArtifactStore::new(
        config.storage.temp_dir.clone(),
        config.storage.results_dir.clone(),
        config.server.max_upload_bytes,
    );
    store.ensure_dirs()?;

    let state = web::Data::new(ApiState {
        orchestrator: Orchestrator::new(context, store, &config),
        request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        max_upload_bytes: config.server.max_upload_bytes,
    });

    let bind_address = config.bind_address();
    let results_dir = config.storage.results_dir.clone();
    let cors_origins = config.server.cors_origins.clone();

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        let cors = cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::ACCEPT,
                actix_web::http::header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .configure(|cfg| configure_routes(cfg, results_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
