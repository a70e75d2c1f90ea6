use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use http::HeaderValue;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{AppState, handlers};

pub fn app_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    api_router(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::health::service_info))
        .route("/health", get(handlers::health::health))
        .route(
            "/api/contacts",
            get(handlers::contacts::list_contacts).post(handlers::contacts::create_contact),
        )
        .route(
            "/api/contacts/search",
            get(handlers::contacts::search_contacts),
        )
        .route(
            "/api/contacts/{id}",
            get(handlers::contacts::get_contact)
                .put(handlers::contacts::update_contact)
                .delete(handlers::contacts::delete_contact),
        )
        .route(
            "/api/contacts/{id}/tags",
            get(handlers::contacts::contact_tags),
        )
        .route(
            "/api/contacts/{id}/tags/{tag_id}",
            put(handlers::contacts::assign_tag).delete(handlers::contacts::unassign_tag),
        )
        .route(
            "/api/tags",
            get(handlers::tags::list_tags).post(handlers::tags::create_tag),
        )
        .route(
            "/api/tags/{id}",
            get(handlers::tags::get_tag)
                .put(handlers::tags::update_tag)
                .delete(handlers::tags::delete_tag),
        )
        .route(
            "/api/tags/{id}/contacts",
            get(handlers::tags::tag_contacts),
        )
        .route("/api/messages/send", post(handlers::messages::send_message))
        .route(
            "/api/messages/bulk",
            get(handlers::messages::list_bulk_jobs).post(handlers::messages::submit_bulk),
        )
        .route(
            "/api/messages/bulk/{job_id}",
            get(handlers::messages::get_bulk_job).delete(handlers::messages::cancel_bulk_job),
        )
        .with_state(state)
}

/// An empty list or `*` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
