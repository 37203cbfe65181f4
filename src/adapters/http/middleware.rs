use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request},
    http::{HeaderValue, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{app_error::AppError, application::jwt, infra::config::AppConfig};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Ensure every request carries a correlation id and echo it on the response.
///
/// Must run outside the trace layer so the span picks up the header.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    if let Some(id) = &id {
        request
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, id.clone());
    }

    let mut response = next.run(request).await;
    if let Some(id) = id {
        response.headers_mut().insert(CORRELATION_ID_HEADER, id);
    }
    response
}

/// Caller identity resolved from the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    Arc<AppConfig>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::Unauthorized)?;

        let config = Arc::<AppConfig>::from_ref(state);
        let claims = jwt::verify(token, &config.jwt_secret)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;

        Ok(Principal {
            user_id,
            email: claims.email,
            is_admin: claims.admin,
        })
    }
}
