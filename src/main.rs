use actix_web::{web, App, HttpServer, HttpResponse, middleware};
use actix_cors::Cors;
use dotenv::dotenv;
use std::env;
use std::sync::Arc;
use log::info;

mod config;
mod models;
mod handlers;
mod services;
mod utils;

use config::PipelineConfig;
use handlers::report::{AppState, latest_report, trigger_report};
use services::cache::ResponseCache;
use services::github::GitHubClient;
use services::narrative::NarrativeClient;
use services::pipeline::PipelineContext;
use services::store::ReportStore;

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "repo-pulse"
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let github_token = env::var("GITHUB_TOKEN").ok();
    let gemini_api_key = env::var("GEMINI_API_KEY").ok();
    let gemini_model = env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
    let store_file = env::var("REPORT_STORE_FILE").unwrap_or_else(|_| "reports.json".to_string());

    let pipeline_config = PipelineConfig::from_env().expect("invalid pipeline configuration");

    let cache = Arc::new(ResponseCache::new(pipeline_config.cache_ttl));
    let github_client = GitHubClient::new(github_token, cache.clone())
        .expect("Failed to create GitHub client");
    let narrative_client = NarrativeClient::new(gemini_api_key, gemini_model);
    let store = Arc::new(ReportStore::new(&store_file).expect("Failed to create report store"));

    let context = Arc::new(PipelineContext {
        github: Arc::new(github_client),
        cache,
        narrative: Arc::new(narrative_client),
        config: pipeline_config,
    });

    let app_state = web::Data::new(AppState { context, store });

    let bind_addr = format!("{}:{}", host, port);
    info!("Starting server on {}", bind_addr);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(app_state.clone())
            .route("/health", web::get().to(health_check))
            .route("/reports/run", web::post().to(trigger_report))
            .route("/reports/latest", web::get().to(latest_report))
    })
    .bind(&bind_addr)?
    .run()
    .await
}
