use crate::services::pipeline::{PipelineContext, run_pipeline};
use crate::services::store::ReportStore;
use actix_web::{HttpResponse, Result as ActixResult, web};
use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

pub struct AppState {
    pub context: Arc<PipelineContext>,
    pub store: Arc<ReportStore>,
}

/// Starts a pipeline run in the background and returns immediately with a
/// run id. The caller detaches; the finished report lands in the store and
/// the outcome is logged. A spawned run that panics is contained by the
/// task boundary and never takes the host down.
pub async fn trigger_report(data: web::Data<AppState>) -> ActixResult<HttpResponse> {
    let run_id = Uuid::new_v4().to_string();
    let context = data.context.clone();
    let store = data.store.clone();
    let id = run_id.clone();

    tokio::spawn(async move {
        info!("run {}: pipeline started", id);
        let mut report = run_pipeline(&context).await;
        report.saved = true;
        if let Err(e) = store.save(&report).await {
            // The run's output is still valid; only the persistence step
            // failed.
            report.saved = false;
            info!("run {}: report {} completed unsaved", id, report.id);
            error!("run {}: report save failed: {}", id, e);
        } else {
            info!("run {}: report {} saved", id, report.id);
        }
    });

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "run_id": run_id,
        "status": "started"
    })))
}

pub async fn latest_report(data: web::Data<AppState>) -> ActixResult<HttpResponse> {
    match data.store.find_latest().await {
        Some(report) => Ok(HttpResponse::Ok().json(report)),
        None => Ok(HttpResponse::NotFound().json(serde_json::json!({
            "error": "no report generated yet"
        }))),
    }
}
