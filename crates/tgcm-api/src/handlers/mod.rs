pub mod contacts;
pub mod health;
pub mod messages;
pub mod tags;

use axum::{
    Json,
    extract::{FromRequest, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tgcm_common::error::TgcmError;
use tracing::error;

pub struct ApiError(pub TgcmError);

/// JSON body extractor whose rejections answer with the `ValidationError`
/// body instead of axum's plain-text one.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TgcmError::validation(rejection.body_text()))
    }
}

impl From<TgcmError> for ApiError {
    fn from(value: TgcmError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            TgcmError::Validation(_) => StatusCode::BAD_REQUEST,
            TgcmError::NotFound(_) => StatusCode::NOT_FOUND,
            TgcmError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }

        (
            status,
            Json(serde_json::json!({
                "code": self.0.error_code(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
