//! Push dispatch routes.
//!
//! Each call fans the payload out to every target and answers once all
//! deliveries (retries included) are finished.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use herald_common::error::AppError;
use herald_notifier::apns::ApnsNotification;
use herald_notifier::apns::frame::{self, PRIORITY_IMMEDIATE};
use herald_notifier::{DispatchReport, FcmSubscription, PushError, webpush};

use crate::middleware::auth::ApiKey;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/push/fcm", post(push_fcm))
        .route("/api/push/apns", post(push_apns))
        .route("/api/push/apns2", post(push_apns2))
}

#[derive(Debug, Deserialize)]
pub struct FcmPushRequest {
    pub subscriptions: Vec<FcmSubscription>,
    /// Sent as-is (UTF-8) inside the encrypted record
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct ApnsPushRequest {
    pub device_tokens: Vec<String>,
    /// APNs JSON payload, e.g. `{"aps": {"alert": "..."}}`
    pub payload: serde_json::Value,
    #[serde(default)]
    pub identifier: u32,
    #[serde(default)]
    pub expiry: u32,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

#[derive(Debug, Deserialize)]
pub struct Apns2PushRequest {
    pub device_tokens: Vec<String>,
    pub payload: serde_json::Value,
}

fn default_priority() -> u8 {
    PRIORITY_IMMEDIATE
}

/// POST /api/push/fcm: Deliver an encrypted Web Push message to each subscription.
async fn push_fcm(
    State(state): State<AppState>,
    _auth: ApiKey,
    Json(req): Json<FcmPushRequest>,
) -> Result<Json<DispatchReport>, AppError> {
    if req.subscriptions.is_empty() {
        return Err(AppError::Validation("subscriptions must not be empty".to_string()));
    }
    if req.payload.len() > webpush::MAX_PAYLOAD_LEN {
        return Err(AppError::Validation(format!(
            "payload exceeds {} bytes",
            webpush::MAX_PAYLOAD_LEN
        )));
    }

    let report = state
        .push
        .send_fcm_notification(&req.subscriptions, req.payload.as_bytes())
        .await
        .map_err(push_error)?;
    Ok(Json(report))
}

/// POST /api/push/apns: Deliver through the binary gateway.
async fn push_apns(
    State(state): State<AppState>,
    _auth: ApiKey,
    Json(req): Json<ApnsPushRequest>,
) -> Result<Json<DispatchReport>, AppError> {
    let payload = apns_payload(&req.device_tokens, &req.payload)?;
    let notification = ApnsNotification {
        identifier: req.identifier,
        expiry: req.expiry,
        priority: req.priority,
        payload,
    };

    let report = state
        .push
        .send_apns_notification(&req.device_tokens, &notification)
        .await
        .map_err(push_error)?;
    Ok(Json(report))
}

/// POST /api/push/apns2: Deliver through the HTTP/2 provider API.
async fn push_apns2(
    State(state): State<AppState>,
    _auth: ApiKey,
    Json(req): Json<Apns2PushRequest>,
) -> Result<Json<DispatchReport>, AppError> {
    let payload = apns_payload(&req.device_tokens, &req.payload)?;

    let report = state
        .push
        .send_apns2_notification(&req.device_tokens, &payload)
        .await
        .map_err(push_error)?;
    Ok(Json(report))
}

fn apns_payload(device_tokens: &[String], payload: &serde_json::Value) -> Result<Vec<u8>, AppError> {
    if device_tokens.is_empty() {
        return Err(AppError::Validation("device_tokens must not be empty".to_string()));
    }
    if !payload.is_object() {
        return Err(AppError::Validation("payload must be a JSON object".to_string()));
    }

    let bytes = serde_json::to_vec(payload)
        .map_err(|e| AppError::Internal(format!("Failed to encode payload: {}", e)))?;
    if bytes.len() > frame::MAX_PAYLOAD_LEN {
        return Err(AppError::Validation(format!(
            "payload exceeds {} bytes",
            frame::MAX_PAYLOAD_LEN
        )));
    }
    Ok(bytes)
}

fn push_error(e: PushError) -> AppError {
    match e {
        PushError::NotConfigured(_) | PushError::Certificate(_) => AppError::Config(e.to_string()),
        other => AppError::Internal(other.to_string()),
    }
}
