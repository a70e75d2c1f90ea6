use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tgcm_common::error::TgcmError;
use tgcm_messaging::{BulkMessageRequest, DirectSendResult, JobSnapshot, SubmittedJob};

use crate::{
    AppState,
    handlers::{ApiError, ApiJson},
    types::SendMessageRequest,
};

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<SendMessageRequest>,
) -> Result<Json<DirectSendResult>, ApiError> {
    if payload.contact_id <= 0 {
        return Err(TgcmError::validation("contact_id must be a positive integer").into());
    }
    let contact = state.contacts().get_contact(payload.contact_id)?;
    let result = state
        .coordinator()
        .send_direct(contact.recipient(), &payload.message)
        .await?;
    Ok(Json(result))
}

pub async fn submit_bulk(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<BulkMessageRequest>,
) -> Result<(StatusCode, Json<SubmittedJob>), ApiError> {
    let job = state.coordinator().submit(payload).await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn list_bulk_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.coordinator().list_jobs().await)
}

pub async fn get_bulk_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.coordinator().get_status(&job_id).await?))
}

pub async fn cancel_bulk_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.coordinator().cancel(&job_id).await?))
}
