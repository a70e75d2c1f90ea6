use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tgcm_common::types::{ContactId, TagId};
use tgcm_store::{Contact, ContactUpdate, NewContact, Tag};

use crate::{
    AppState,
    handlers::{ApiError, ApiJson},
    types::{ContactView, ListQuery, MessageResponse, SearchQuery, TagAssignment},
};

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let contacts = state
        .contacts()
        .list_contacts(query.limit, query.offset.unwrap_or(0))?;
    Ok(Json(contacts))
}

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    ApiJson(payload): ApiJson<NewContact>,
) -> Result<(StatusCode, Json<ContactView>), ApiError> {
    let contact = state.contacts().create_contact(payload).await?;
    Ok((StatusCode::CREATED, Json(contact_view(&state, contact)?)))
}

pub async fn search_contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let contacts =
        state
            .contacts()
            .search_contacts(&query.q, query.limit, query.offset.unwrap_or(0))?;
    Ok(Json(contacts))
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ContactId>,
) -> Result<Json<ContactView>, ApiError> {
    let contact = state.contacts().get_contact(id)?;
    Ok(Json(contact_view(&state, contact)?))
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ContactId>,
    ApiJson(payload): ApiJson<ContactUpdate>,
) -> Result<Json<ContactView>, ApiError> {
    let contact = state.contacts().update_contact(id, payload).await?;
    Ok(Json(contact_view(&state, contact)?))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ContactId>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.contacts().delete_contact(id).await?;
    Ok(Json(MessageResponse {
        message: "contact deleted".to_string(),
    }))
}

pub async fn contact_tags(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ContactId>,
) -> Result<Json<Vec<Tag>>, ApiError> {
    Ok(Json(state.contacts().tags_for_contact(id)?))
}

pub async fn assign_tag(
    State(state): State<Arc<AppState>>,
    Path((contact_id, tag_id)): Path<(ContactId, TagId)>,
) -> Result<Json<TagAssignment>, ApiError> {
    let changed = state
        .contacts()
        .add_tag_to_contact(contact_id, tag_id)
        .await?;
    Ok(Json(TagAssignment {
        contact_id,
        tag_id,
        changed,
    }))
}

pub async fn unassign_tag(
    State(state): State<Arc<AppState>>,
    Path((contact_id, tag_id)): Path<(ContactId, TagId)>,
) -> Result<Json<TagAssignment>, ApiError> {
    let changed = state
        .contacts()
        .remove_tag_from_contact(contact_id, tag_id)
        .await?;
    Ok(Json(TagAssignment {
        contact_id,
        tag_id,
        changed,
    }))
}

fn contact_view(state: &AppState, contact: Contact) -> Result<ContactView, ApiError> {
    let tags = state.contacts().tags_for_contact(contact.id)?;
    Ok(ContactView { contact, tags })
}
