use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::app_error::{AppError, AppResult};

// ============================================================================
// Principal Claims
// ============================================================================

/// Claims carried by the session token issued by the authentication service.
#[derive(Debug, Serialize, Deserialize)]
pub struct PrincipalClaims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    pub exp: i64,
    pub iat: i64,
}

pub fn issue(
    user_id: Uuid,
    email: &str,
    admin: bool,
    secret: &SecretString,
    ttl: Duration,
) -> AppResult<String> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = PrincipalClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        admin,
        iat: now,
        exp: now + ttl.whole_seconds(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

/// Any decoding or validation failure is reported as `Unauthorized`.
pub fn verify(token: &str, secret: &SecretString) -> AppResult<PrincipalClaims> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<PrincipalClaims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized)
}
