use shortlist_engine::config::EngineConfig;
use shortlist_engine::db::Database;
use shortlist_engine::embedding::EmbeddingService;
use shortlist_engine::logging;
use shortlist_engine::ml::classifier::SubprocessClassifier;
use shortlist_engine::ml::embedder::SubprocessEmbedder;
use shortlist_engine::ml::parser::ResumeParser;
use shortlist_engine::predict::PredictionEngine;
use shortlist_engine::server::{create_app, AppState};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    let config = EngineConfig::from_env();

    logging::init_logging(&config.log_path());
    logging::setup_panic_hook();

    let db = Database::new(config.resolved_database_path());
    if let Err(e) = db.init() {
        eprintln!("Failed to initialize database: {}", e);
        log::error!("[Storage] Failed to initialize database: {}", e);
        std::process::exit(1);
    }

    if config.classifier_model_path.is_none() {
        logging::log_warning(
            "Startup",
            "CLASSIFIER_MODEL_PATH is not set; starting degraded, predict endpoints will return 503",
        );
    }

    let embedder = SubprocessEmbedder::new(
        config.embedding_model_id.clone(),
        config.embedding_timeout_ms,
    );
    let embeddings = Arc::new(EmbeddingService::new(
        Box::new(embedder),
        config.embedding_cache_disabled,
    ));

    let classifier = SubprocessClassifier::new(
        config.classifier_model_path.clone(),
        config.prediction_timeout_ms,
    );

    let engine = Arc::new(PredictionEngine::new(
        db.clone(),
        embeddings,
        Arc::new(classifier),
        &config,
    ));

    let parser = Arc::new(ResumeParser::new(config.parser_timeout_ms));

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        config,
        db,
        engine,
        parser,
        started_at: Instant::now(),
    });

    let app = create_app(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", bind_addr, e);
            log::error!("[Startup] Failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    logging::log_info("Startup", &format!("Listening on {}", bind_addr));
    if let Err(e) = axum::serve(listener, app).await {
        log::error!("[Startup] Server error: {}", e);
        eprintln!("Server error: {}", e);
    }
}
