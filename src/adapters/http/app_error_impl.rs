use crate::app_error::{AppError, ErrorCode};
use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the error before it gets converted into a status response.
        tracing::error!(error = ?self, "Request failed");

        match self {
            AppError::Database(_) => {
                error_resp(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DatabaseError, None)
            }
            AppError::InvalidInput(msg) => {
                error_resp(StatusCode::BAD_REQUEST, ErrorCode::InvalidInput, Some(msg))
            }
            AppError::InvalidSignature(_) => {
                error_resp(StatusCode::BAD_REQUEST, ErrorCode::InvalidSignature, None)
            }
            AppError::DecodeFailure(_) => {
                error_resp(StatusCode::BAD_REQUEST, ErrorCode::DecodeFailure, None)
            }
            AppError::Unauthorized => {
                error_resp(StatusCode::UNAUTHORIZED, ErrorCode::Unauthorized, None)
            }
            AppError::Forbidden => error_resp(StatusCode::FORBIDDEN, ErrorCode::Forbidden, None),
            AppError::NotFound => error_resp(StatusCode::NOT_FOUND, ErrorCode::NotFound, None),
            AppError::DataInconsistency(msg) => {
                error_resp(StatusCode::CONFLICT, ErrorCode::DataInconsistency, Some(msg))
            }
            err @ AppError::SubscriptionAlreadyActive => error_resp(
                StatusCode::CONFLICT,
                ErrorCode::SubscriptionAlreadyActive,
                Some(err.to_string()),
            ),
            err @ AppError::PaymentMethodRequired => error_resp(
                StatusCode::PAYMENT_REQUIRED,
                ErrorCode::PaymentMethodRequired,
                Some(err.to_string()),
            ),
            // Only the short provider code leaves the service, never its message.
            AppError::ProviderRejected { code, .. } => {
                let body = serde_json::json!({
                    "code": ErrorCode::ProviderRejected.as_str(),
                    "message": "The payment provider declined the request",
                    "provider_code": code,
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            AppError::ProviderUnavailable(_) => error_resp(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::ProviderUnavailable,
                None,
            ),
            AppError::QueueFull => {
                error_resp(StatusCode::SERVICE_UNAVAILABLE, ErrorCode::QueueFull, None)
            }
            AppError::CancellationNotConfirmed => error_resp(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::CancellationNotConfirmed,
                None,
            ),
            AppError::Internal(_) => {
                error_resp(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError, None)
            }
        }
    }
}

fn error_resp(status: StatusCode, code: ErrorCode, message: Option<String>) -> Response {
    let body = match message {
        Some(msg) => serde_json::json!({ "code": code.as_str(), "message": msg }),
        None => serde_json::json!({ "code": code.as_str() }),
    };
    (status, Json(body)).into_response()
}
