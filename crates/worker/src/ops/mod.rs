//! Operational HTTP surface: health, queue inspection, manual triggers and
//! the registration entry points.

pub mod dto;
pub mod errors;
pub mod routes;

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};

use kotoba_infra::jobs::Dispatcher;
use kotoba_infra::services::ContentService;
use kotoba_infra::store::EnrichmentStore;

/// Shared state behind every route.
pub struct AppState<S> {
    pub dispatcher: Arc<Dispatcher<S>>,
    pub service: ContentService<S>,
}

impl<S: EnrichmentStore + 'static> AppState<S> {
    pub fn new(dispatcher: Arc<Dispatcher<S>>) -> Self {
        let service = ContentService::new(dispatcher.store().clone());
        Self {
            dispatcher,
            service,
        }
    }
}

pub fn router<S: EnrichmentStore + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/jobs", post(routes::enqueue_job::<S>))
        .route("/jobs/stats", get(routes::job_stats::<S>))
        .route("/jobs/recent", get(routes::recent_jobs::<S>))
        .route("/jobs/run-pending", post(routes::run_pending::<S>))
        .route("/jobs/:id/run", post(routes::run_job::<S>))
        .route("/words", post(routes::register_word::<S>))
        .route("/sentences", post(routes::register_sentence::<S>))
        .route("/sentences/:id/analyze", post(routes::analyze_sentence::<S>))
        .route("/conversations", post(routes::request_conversation::<S>))
        .layer(Extension(state))
}
