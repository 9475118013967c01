use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use payloads::{
    StartReadingRequest, StartReadingResponse, SubmitReadRequest, SubmitReadResponse,
};
use tracing::debug;

use crate::{
    error::AppError,
    service::SubmitOutcome,
    state::State,
    utils::{acting_user, decode_body},
};

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn start_reading_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<StartReadingResponse>, AppError> {
    let user_id = acting_user(&headers)?;
    let request: StartReadingRequest = decode_body(&body)?;

    debug!("start-reading user {user_id} article {}", request.article_id);

    let issued = state
        .service
        .issue(&user_id, &request.article_id, request.fingerprint)
        .await?;

    Ok(Json(StartReadingResponse {
        read_token: issued.token,
        min_dwell_ms: issued.min_dwell_ms,
        expires_at: issued.expires_at_ms,
    }))
}

pub async fn submit_read_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitReadResponse>, AppError> {
    let user_id = acting_user(&headers)?;
    let request: SubmitReadRequest = decode_body(&body)?;

    debug!("submit-read user {user_id} article {}", request.article_id);

    match state
        .service
        .submit(
            &user_id,
            &request.article_id,
            &request.read_token,
            &request.metrics,
        )
        .await?
    {
        SubmitOutcome::Credited {
            progress,
            fingerprint_matched,
        } => Ok(Json(SubmitReadResponse {
            progress,
            fingerprint_matched,
        })),
        SubmitOutcome::Rejected(reason) => Err(AppError::Rejected(reason)),
    }
}
