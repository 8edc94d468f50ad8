use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::engine::EngineError;

use super::dto::ErrorBody;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::InvalidRange(_) => StatusCode::BAD_REQUEST,
                EngineError::VehicleNotFound(_) | EngineError::BookingNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::VehicleNotListed(_) | EngineError::LimitExceeded(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                EngineError::SlotUnavailable(_) | EngineError::InvalidTransition { .. } => {
                    StatusCode::CONFLICT
                }
                EngineError::Unauthorized => StatusCode::FORBIDDEN,
                EngineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("request failed: {self}");
        } else {
            tracing::warn!("request rejected ({status}): {self}");
        }
        let body = ErrorBody {
            success: false,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
