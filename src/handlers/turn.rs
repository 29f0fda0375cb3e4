use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::errors::AppError;
use crate::services::conversation::{self, TurnRequest};
use crate::state::AppState;

/// POST /api/turn — the sole conversational entry point. The transport
/// collaborator signs the raw JSON body with HMAC-SHA1; an unconfigured
/// secret skips validation (dev mode).
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.config.turn_signing_secret.is_empty() {
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(&state.config.turn_signing_secret, signature, &body) {
            tracing::warn!("missing or invalid turn signature");
            return Err(AppError::Forbidden);
        }
    }

    let req: TurnRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("malformed turn payload: {e}")))?;
    if req.conversation_id.trim().is_empty()
        || req.business_id.trim().is_empty()
        || req.message.trim().is_empty()
    {
        return Err(AppError::BadRequest(
            "conversation_id, business_id and message are required".to_string(),
        ));
    }

    match conversation::handle_turn(&state, &req)? {
        Some(outcome) => Ok(Json(serde_json::json!({
            "reply_text": outcome.reply,
            "conversation_status": outcome.status.as_str(),
            "deduped": false,
        }))),
        None => Ok(Json(serde_json::json!({
            "reply_text": null,
            "conversation_status": "answered",
            "deduped": true,
        }))),
    }
}

fn verify_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let mut mac = match Hmac::<Sha1>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    let expected = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());
    expected == signature
}
