//! Drop deposit and redemption endpoints.
//!
//! A sender deposits a file or message and gets back an unguessable token.
//! Anyone holding the token can attempt redemption; the access gate decides.
//!
//! ## Storage
//!
//! - Metadata lives in Postgres (`drops` table), content in S3 for files or
//!   inline in the row for messages
//! - File content travels as base64 in both directions
//! - One-time codes live in Redis with a short TTL
//!
//! ## Endpoints
//!
//! - POST /drops - Deposit a drop (quota-gated per origin)
//! - POST /drops/{token}/redeem - Redeem under the configured gates
//! - POST /drops/{token}/otp - Email a one-time code to the designated
//!   recipient (frequency-limited)

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use garde::Validate;
use shared::api::{
    CreateDropPayload, CreateDropResponse, ErrorBody, RedeemPayload, RedeemResponse,
    RequestOtpPayload,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::origin::{CallerIp, Origin},
    models::{DropKind, NewDrop},
    repos::{Admission, outcomes},
    services::{AccessGate, Denial, GateOutcome, RedeemRequest, hash_password},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_drop))
        .route("/{token}/redeem", post(redeem_drop))
        .route("/{token}/otp", post(request_otp))
}

#[debug_handler]
async fn create_drop(
    origin: Origin,
    State(state): State<AppState>,
    Json(payload): Json<CreateDropPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate_with(&Utc::now())
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // Decode before the quota admit so malformed input never burns a slot.
    let decoded = match payload.kind {
        shared::api::DropKind::File => Some(
            BASE64
                .decode(&payload.content)
                .map_err(|_| AppError::Validation("content: invalid base64".into()))?,
        ),
        shared::api::DropKind::Message => None,
    };

    let limit = origin.tier.drop_limit(&state.config);
    match state.repos.quota.admit(&origin.identity, limit).await? {
        Admission::Admitted { .. } => {}
        Admission::Blocked => {
            let body = ErrorBody::new("quota_blocked", "Drop creation is blocked for this origin");
            return Err(AppError::Denied(StatusCode::FORBIDDEN, body));
        }
        Admission::LimitReached { used, limit } => {
            let mut body = ErrorBody::new("quota_limit_reached", "Lifetime drop limit reached");
            body.used = Some(used);
            body.limit = Some(limit);
            return Err(AppError::Denied(StatusCode::TOO_MANY_REQUESTS, body));
        }
    }

    let (blob_ref, payload_inline) = match decoded {
        Some(bytes) => (Some(state.blob.put(bytes).await?), None),
        None => (None, Some(payload.content.clone())),
    };

    let new_drop = NewDrop {
        token: Uuid::new_v4().simple().to_string(),
        kind: DropKind::from(payload.kind),
        blob_ref: blob_ref.clone(),
        payload_inline,
        file_name: payload.file_name.clone(),
        expires_at: payload.expires_at,
        max_opens: payload.max_opens as i32,
        password_hash: payload.password.as_deref().map(hash_password),
        otp_recipient: payload.otp_recipient.as_deref().map(str::to_lowercase),
        origin_identity: origin.identity.clone(),
    };

    let drop = match state.repos.drops.insert(new_drop).await {
        Ok(drop) => drop,
        Err(e) => {
            // The row never existed, so the sweep will never find this blob.
            if let Some(blob_ref) = &blob_ref
                && let Err(cleanup) = state.blob.delete(blob_ref).await
            {
                tracing::warn!(blob_ref = %blob_ref, "orphaned blob after failed insert: {:?}", cleanup);
            }
            return Err(e.into());
        }
    };

    tracing::info!(drop_id = %drop.id, kind = ?drop.kind, origin = %origin.identity, "drop created");

    Ok((
        StatusCode::CREATED,
        Json(CreateDropResponse {
            token: drop.token,
            expires_at: drop.expires_at,
        }),
    ))
}

#[debug_handler]
async fn redeem_drop(
    CallerIp(ip): CallerIp,
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<RedeemPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let gate = AccessGate::from_state(&state);
    let request = RedeemRequest {
        token,
        password: payload.password,
        otp: payload.otp,
        recipient: payload.recipient,
        ip,
    };

    let drop = match gate.redeem(&request).await? {
        GateOutcome::Granted(drop) => drop,
        GateOutcome::Denied(denial) => return Err(denial.into()),
    };

    let content = match drop.kind {
        DropKind::File => {
            let blob_ref = drop.blob_ref.as_deref().ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("file drop {} has no blob reference", drop.id))
            })?;
            BASE64.encode(state.blob.get(blob_ref).await?)
        }
        DropKind::Message => drop.payload_inline.clone().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("message drop {} has no inline payload", drop.id))
        })?,
    };

    Ok(Json(RedeemResponse {
        kind: drop.kind.into(),
        content,
        file_name: drop.file_name.clone(),
        opens_remaining: drop.opens_remaining() as u32,
    }))
}

#[debug_handler]
async fn request_otp(
    CallerIp(ip): CallerIp,
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<RequestOtpPayload>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let Some(drop) = state.repos.drops.find_by_token(&token).await? else {
        return Err(Denial::NotFound.into());
    };
    if Utc::now() >= drop.expires_at {
        return Err(Denial::Expired.into());
    }
    if drop.lifecycle_state.is_terminal() || drop.open_count >= drop.max_opens {
        return Err(Denial::Exhausted.into());
    }

    let Some(recipient) = &drop.otp_recipient else {
        return Err(AppError::External(
            StatusCode::BAD_REQUEST,
            "This drop is not OTP-gated",
        ));
    };
    if !payload.recipient.eq_ignore_ascii_case(recipient) {
        return Err(AppError::External(
            StatusCode::FORBIDDEN,
            "Codes are only sent to the drop's designated recipient",
        ));
    }

    let key = format!("ratelimit:otp:{}:{}", token, recipient);
    let window = state
        .stores
        .rate_limiter
        .check(&key, state.config.otp_request_limit, state.config.otp_request_window_secs)
        .await?;
    if !window.is_allowed() {
        return Err(AppError::External(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many code requests, try again later",
        ));
    }

    let code = state
        .stores
        .otp
        .issue(&token, recipient, state.config.otp_ttl_secs)
        .await?;

    // The entry exists either way; the recipient can re-request on a lost
    // email.
    if let Err(e) = state.email.send_otp_code(recipient, &code).await {
        tracing::warn!(token = %token, "failed to deliver one-time code: {:?}", e);
    }

    state
        .repos
        .access_log
        .log(Some(drop.id), &token, outcomes::OTP_REQUESTED, ip.as_deref())
        .await;

    Ok(StatusCode::ACCEPTED)
}
