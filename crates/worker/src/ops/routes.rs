use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use kotoba_core::SentenceId;
use kotoba_infra::jobs::{JobId, JobStatus, JobStore, JobType};
use kotoba_infra::store::EnrichmentStore;

use super::dto::{
    AnalysisQueued, AnalyzeQuery, ConversationRequest, EnqueueJobRequest, JobCreated,
    RecentJobsQuery, RegisterSentenceRequest, RegisterWordRequest, SentenceRegistered,
    WordRegistered,
};
use super::errors::{
    dispatch_error_to_response, json_error, service_error_to_response, store_error_to_response,
};
use super::AppState;

const DEFAULT_RECENT_LIMIT: usize = 50;
const MAX_RECENT_LIMIT: usize = 500;

type State<S> = Extension<Arc<AppState<S>>>;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn job_stats<S: EnrichmentStore + 'static>(Extension(state): State<S>) -> Response {
    match state.dispatcher.store().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

pub async fn recent_jobs<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Query(query): Query<RecentJobsQuery>,
) -> Response {
    let status = match query.status.as_deref().map(str::parse::<JobStatus>).transpose() {
        Ok(status) => status,
        Err(msg) => return json_error(StatusCode::BAD_REQUEST, "invalid_status", msg),
    };
    let limit = query.limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);

    match state.dispatcher.store().list_by_status(status, limit).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => store_error_to_response(e),
    }
}

/// Drain the queue now, ignoring the schedule.
pub async fn run_pending<S: EnrichmentStore + 'static>(Extension(state): State<S>) -> Response {
    match state.dispatcher.run_all_pending_now().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => dispatch_error_to_response(e),
    }
}

pub async fn run_job<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Path(id): Path<JobId>,
) -> Response {
    match state.dispatcher.process_job(id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => dispatch_error_to_response(e),
    }
}

pub async fn enqueue_job<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Json(body): Json<EnqueueJobRequest>,
) -> Response {
    let job_type = JobType::parse(body.job_type.trim());
    if !JobType::KNOWN.contains(&job_type) {
        let known: Vec<&str> = JobType::KNOWN.iter().map(JobType::as_str).collect();
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_job_type",
            format!("job_type must be one of: {}", known.join(", ")),
        );
    }

    match state.service.enqueue(job_type, body.payload).await {
        Ok(job_id) => (StatusCode::CREATED, Json(JobCreated { job_id })).into_response(),
        Err(e) => service_error_to_response(e),
    }
}

pub async fn register_word<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Json(body): Json<RegisterWordRequest>,
) -> Response {
    match state.service.register_word(&body.word, body.user_id).await {
        Ok(registered) => {
            let status = if registered.created { StatusCode::CREATED } else { StatusCode::OK };
            let body = WordRegistered {
                word_id: registered.word_id,
                created: registered.created,
                job_id: registered.job_id,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => service_error_to_response(e),
    }
}

pub async fn register_sentence<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Json(body): Json<RegisterSentenceRequest>,
) -> Response {
    let (sentence, user_id) = body.into_parts();
    match state.service.register_sentence(sentence, user_id).await {
        Ok(registered) => {
            let status = if registered.created { StatusCode::CREATED } else { StatusCode::OK };
            let body = SentenceRegistered {
                sentence_id: registered.sentence_id,
                created: registered.created,
                job_id: registered.job_id,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => service_error_to_response(e),
    }
}

pub async fn analyze_sentence<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Path(id): Path<SentenceId>,
    Query(query): Query<AnalyzeQuery>,
) -> Response {
    let job_id = match state.service.request_sentence_analysis(id).await {
        Ok(job_id) => job_id,
        Err(e) => return service_error_to_response(e),
    };

    let outcome = match job_id {
        Some(job_id) if query.now => match state.dispatcher.process_job(job_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => return dispatch_error_to_response(e),
        },
        _ => None,
    };

    let status = if job_id.is_some() { StatusCode::ACCEPTED } else { StatusCode::OK };
    (status, Json(AnalysisQueued { job_id, outcome })).into_response()
}

pub async fn request_conversation<S: EnrichmentStore + 'static>(
    Extension(state): State<S>,
    Json(body): Json<ConversationRequest>,
) -> Response {
    match state
        .service
        .request_conversation(body.user_id, body.situation, body.level, body.idiom_ids)
        .await
    {
        Ok(job_id) => (StatusCode::CREATED, Json(JobCreated { job_id })).into_response(),
        Err(e) => service_error_to_response(e),
    }
}
