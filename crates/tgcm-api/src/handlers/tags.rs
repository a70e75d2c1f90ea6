use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tgcm_common::types::TagId;
use tgcm_store::{Contact, NewTag, TagSummary, TagUpdate};

use crate::{
    AppState,
    handlers::{ApiError, ApiJson},
    types::MessageResponse,
};

pub async fn list_tags(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TagSummary>>, ApiError> {
    Ok(Json(state.contacts().list_tags()?))
}

pub async fn create_tag(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewTag>,
) -> Result<(StatusCode, Json<TagSummary>), ApiError> {
    let tag = state.contacts().create_tag(payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(TagSummary {
            tag,
            contact_count: 0,
        }),
    ))
}

pub async fn get_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TagId>,
) -> Result<Json<TagSummary>, ApiError> {
    Ok(Json(state.contacts().tag_summary(id)?))
}

pub async fn update_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TagId>,
    ApiJson(payload): ApiJson<TagUpdate>,
) -> Result<Json<TagSummary>, ApiError> {
    state.contacts().update_tag(id, payload).await?;
    Ok(Json(state.contacts().tag_summary(id)?))
}

pub async fn delete_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TagId>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.contacts().delete_tag(id).await?;
    Ok(Json(MessageResponse {
        message: "tag deleted".to_string(),
    }))
}

pub async fn tag_contacts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TagId>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    Ok(Json(state.contacts().contacts_by_tag(id)?))
}
