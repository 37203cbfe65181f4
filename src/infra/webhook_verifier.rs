//! Stripe webhook signature verification and envelope decoding.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use crate::{
    app_error::{AppError, AppResult},
    domain::entities::billing_event::{WebhookEnvelope, unix_to_utc},
};

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Check the `Stripe-Signature` header against the raw body, then decode
    /// the envelope. Pure: no I/O.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> AppResult<WebhookEnvelope> {
        // Header format: "t=timestamp,v1=signature,..."
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| AppError::InvalidSignature("missing timestamp".into()))?;
        if signatures.is_empty() {
            return Err(AppError::InvalidSignature("missing v1 signature".into()));
        }
        let ts: i64 = timestamp
            .parse()
            .map_err(|_| AppError::InvalidSignature("invalid timestamp".into()))?;

        let expected = compute_signature(&self.secret, ts, payload)?;
        if !signatures.iter().any(|sig| constant_time_compare(sig, &expected)) {
            return Err(AppError::InvalidSignature("signature mismatch".into()));
        }

        if (now.timestamp() - ts).abs() > self.tolerance_secs {
            return Err(AppError::InvalidSignature(
                "timestamp outside tolerance window".into(),
            ));
        }

        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::InvalidSignature(format!("malformed envelope: {}", e)))?;
        let created_at = unix_to_utc(raw.created)
            .ok_or_else(|| AppError::InvalidSignature("invalid created timestamp".into()))?;

        Ok(WebhookEnvelope {
            event_id: raw.id,
            event_type: raw.event_type,
            created_at,
            object: raw.data.object,
        })
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(secret: &SecretString, timestamp: i64, payload: &[u8]) -> AppResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| AppError::Internal("HMAC error".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
