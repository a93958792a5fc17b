mod auth;
mod config;
mod db;
mod detection;
mod error;
mod inference;
mod report;
mod routes;
mod storage;
mod validation;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use auth::jwt::JwtService;
use auth::middleware::AuthMiddleware;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use config::{AppConfig, DatabaseConfig};
use db::dynamodb_repository::DynamoDbRepository;
use db::{InMemoryRepository, Repository};
use detection::DetectionOrchestrator;
use inference::config::ModelConfig;
use inference::predictor::DualModelPredictor;
use inference::registry::ModelRegistry;
use report::ReportService;
use report::fetch::HttpImageFetcher;
use routes::{AppState, configure_routes};
use std::sync::Arc;
use storage::RemoteStore;
use storage::adapter::StorageAdapter;
use storage::local::LocalStore;
use storage::s3_service::S3Service;

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    log::error!("{}: {}", context, err);
    std::io::Error::other(format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| startup_error("Invalid configuration", e))?;

    let model_config = if config.model_config_path.exists() {
        ModelConfig::load(&config.model_config_path)
            .map_err(|e| startup_error("Failed to load model configuration", e))?
    } else {
        log::warn!(
            "Model configuration {} not found, using defaults",
            config.model_config_path.display()
        );
        ModelConfig::default()
    };

    let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

    let repo: Arc<dyn Repository> = match &config.database {
        DatabaseConfig::Memory => {
            log::warn!("Using in-memory repository; records are lost on restart");
            Arc::new(InMemoryRepository::new())
        }
        DatabaseConfig::DynamoDb {
            users_table,
            images_table,
            predictions_table,
            reports_table,
            activities_table,
        } => {
            let db_repo = DynamoDbRepository::new(
                DynamoDbClient::new(&aws_config),
                users_table.clone(),
                images_table.clone(),
                predictions_table.clone(),
                reports_table.clone(),
                activities_table.clone(),
            );
            db_repo
                .verify_tables()
                .await
                .map_err(|e| startup_error("DynamoDB tables unavailable", e))?;
            Arc::new(db_repo)
        }
    };

    let remote = S3Service::from_config(&aws_config, &config.storage)
        .map(|s3| Arc::new(s3) as Arc<dyn RemoteStore>);
    if remote.is_none() {
        log::info!(
            "No bucket configured; files are stored under {}",
            config.storage.local_root.display()
        );
    }
    let storage = Arc::new(StorageAdapter::new(
        remote,
        LocalStore::new(config.storage.local_root.clone()),
        config.storage.timeout,
    ));

    let registry = Arc::new(ModelRegistry::new(inference::default_loader(&model_config)));
    if config.preload_models {
        match registry.preload() {
            Ok(()) => log::info!("Models preloaded on {}", registry.device()),
            Err(e) => log::error!("Model preload failed, will retry on first request: {}", e),
        }
    }
    let predictor = Arc::new(DualModelPredictor::new(
        registry,
        model_config.inference_timeout(),
    ));

    let detection = Arc::new(DetectionOrchestrator::new(
        repo.clone(),
        storage.clone(),
        predictor,
        &model_config,
    ));
    let fetcher = Arc::new(
        HttpImageFetcher::new(storage.clone(), config.storage.timeout)
            .map_err(|e| startup_error("Failed to build HTTP client", e))?,
    );
    let reports = Arc::new(ReportService::new(repo.clone(), storage.clone(), fetcher));

    let state = web::Data::new(AppState {
        repo,
        storage,
        detection,
        reports,
        models: Arc::new(model_config),
        auto_detect: config.auto_detect,
    });
    let auth_middleware = AuthMiddleware::new(JwtService::new(&config.jwt_secret));

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(auth_middleware.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::AUTHORIZATION,
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .expose_headers(vec!["Content-Disposition", "X-Report-Id"])
                    .max_age(3600),
            )
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await
}
