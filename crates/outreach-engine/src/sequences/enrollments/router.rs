use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::bulk::BulkEnrollmentRequest;
use super::domain::{AutoEnrollmentConfig, EnrollmentId, SequenceId, StageChangeEvent};
use super::query::EnrollmentListParams;
use super::repository::{
    AutoEnrollmentConfigStore, EnrollmentStore, PipelineDirectory, SequenceDirectory,
};
use super::service::{
    EnrollmentEngine, EnrollmentError, EnrollmentUpdate, NewEnrollment,
};

/// Router builder exposing the sequence-enrollment HTTP surface.
pub fn enrollment_router<S, C, P, D>(engine: Arc<EnrollmentEngine<S, C, P, D>>) -> Router
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    Router::new()
        .route(
            "/api/v1/sequence-enrollments/enrollments",
            get(list_handler::<S, C, P, D>).post(create_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/enrollments/bulk",
            post(bulk_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/enrollments/:enrollment_id",
            get(get_handler::<S, C, P, D>)
                .patch(update_handler::<S, C, P, D>)
                .delete(remove_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/enrollments/:enrollment_id/pause",
            patch(pause_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/enrollments/:enrollment_id/resume",
            patch(resume_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/sequences/:sequence_id/enrollments",
            get(sequence_list_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/sequences/:sequence_id/auto-enrollment",
            get(auto_config_handler::<S, C, P, D>).post(set_auto_config_handler::<S, C, P, D>),
        )
        .route(
            "/api/v1/sequence-enrollments/events/stage-change",
            post(stage_change_handler::<S, C, P, D>),
        )
        .with_state(engine)
}

/// Maps engine errors onto HTTP statuses: state-machine and uniqueness
/// violations are 409, unknown references 404, rejected configs 422.
pub fn error_response(error: EnrollmentError) -> Response {
    let status = match &error {
        EnrollmentError::DuplicateEnrollment { .. }
        | EnrollmentError::InvalidTransition(_)
        | EnrollmentError::Conflict(_) => StatusCode::CONFLICT,
        EnrollmentError::NotFound(_)
        | EnrollmentError::UnknownSequence(_)
        | EnrollmentError::UnknownApplication(_)
        | EnrollmentError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
        EnrollmentError::OverlappingStages(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EnrollmentError::Store(_) | EnrollmentError::Directory(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let payload = json!({ "error": error.to_string() });
    (status, Json(payload)).into_response()
}

fn respond<T: serde::Serialize>(
    result: Result<T, EnrollmentError>,
    success: StatusCode,
) -> Response {
    match result {
        Ok(value) => (success, Json(value)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn list_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Query(params): Query<EnrollmentListParams>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(engine.list(params), StatusCode::OK)
}

async fn sequence_list_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(sequence_id): Path<String>,
    Query(mut params): Query<EnrollmentListParams>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    params.sequence_id = Some(SequenceId(sequence_id));
    respond(engine.list(params), StatusCode::OK)
}

async fn create_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Json(request): Json<NewEnrollment>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(engine.enroll(request), StatusCode::CREATED)
}

async fn bulk_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Json(request): Json<BulkEnrollmentRequest>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    // Itemized partial failure is a 200; only an unusable request errors.
    respond(
        engine.enroll_bulk(request, CancellationToken::new()).await,
        StatusCode::OK,
    )
}

async fn get_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(engine.get(&EnrollmentId(enrollment_id)), StatusCode::OK)
}

async fn pause_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(engine.pause(&EnrollmentId(enrollment_id)), StatusCode::OK)
}

async fn resume_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(engine.resume(&EnrollmentId(enrollment_id)), StatusCode::OK)
}

async fn update_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(enrollment_id): Path<String>,
    Json(update): Json<EnrollmentUpdate>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(
        engine.update(&EnrollmentId(enrollment_id), update),
        StatusCode::OK,
    )
}

async fn remove_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(enrollment_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    match engine.remove(&EnrollmentId(enrollment_id)) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(error),
    }
}

async fn auto_config_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(sequence_id): Path<String>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(engine.auto_config(&SequenceId(sequence_id)), StatusCode::OK)
}

async fn set_auto_config_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Path(sequence_id): Path<String>,
    Json(config): Json<AutoEnrollmentConfig>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    respond(
        engine.set_auto_config(&SequenceId(sequence_id), config).await,
        StatusCode::OK,
    )
}

async fn stage_change_handler<S, C, P, D>(
    State(engine): State<Arc<EnrollmentEngine<S, C, P, D>>>,
    Json(event): Json<StageChangeEvent>,
) -> Response
where
    S: EnrollmentStore + 'static,
    C: AutoEnrollmentConfigStore + 'static,
    P: PipelineDirectory + 'static,
    D: SequenceDirectory + 'static,
{
    match engine.handle_stage_change(event).await {
        Ok(outcomes) => (StatusCode::OK, Json(json!({ "outcomes": outcomes }))).into_response(),
        Err(error) => error_response(error),
    }
}
