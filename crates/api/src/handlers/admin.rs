//! Administrative endpoints: on-demand sweeps and quota interventions.
//!
//! All routes require the bearer token from `SEALBOX_ADMIN_TOKEN`. When no
//! token is configured the routes answer 404, so a deployment without one
//! simply has no admin surface.
//!
//! ## Endpoints
//!
//! - POST /admin/sweep - Run a reclamation sweep now, return its counts
//! - POST /admin/quota/{origin}/reset - Zero an origin's lifetime counter
//! - POST /admin/quota/{origin}/block - Refuse all creations from an origin
//! - POST /admin/quota/{origin}/unblock
//! - GET /admin/drops/{token}/log - Recent redemption attempts for a token

use axum::{
    Json, RequestPartsExt, Router, debug_handler,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use shared::api::SweepResponse;
use subtle::ConstantTimeEq;

use crate::{error::AppError, services::Reclaimer, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sweep", post(sweep_now))
        .route("/quota/{origin}/reset", post(reset_quota))
        .route("/quota/{origin}/block", post(block_origin))
        .route("/quota/{origin}/unblock", post(unblock_origin))
        .route("/drops/{token}/log", get(drop_access_log))
}

/// Proof that the request carried the configured admin token.
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.config.admin_token else {
            return Err(AppError::External(StatusCode::NOT_FOUND, "Not found"));
        };

        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| {
                AppError::External(StatusCode::UNAUTHORIZED, "Missing authorization token")
            })?;

        if !bool::from(bearer.token().as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AppError::External(
                StatusCode::UNAUTHORIZED,
                "Invalid admin token",
            ));
        }

        Ok(AdminAuth)
    }
}

#[debug_handler]
async fn sweep_now(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let report = Reclaimer::from_state(&state).sweep().await?;

    tracing::info!(
        reclaimed = report.reclaimed,
        failed = report.failed,
        "administrative sweep complete"
    );

    Ok(Json(SweepResponse {
        marked_expired: report.marked_expired,
        reclaimed: report.reclaimed,
        failed: report.failed,
        skipped: report.skipped,
    }))
}

#[debug_handler]
async fn reset_quota(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.repos.quota.reset(&origin).await? {
        return Err(AppError::External(
            StatusCode::NOT_FOUND,
            "No quota record for that origin",
        ));
    }

    tracing::info!(origin = %origin, "quota counter reset");

    Ok(StatusCode::OK)
}

#[debug_handler]
async fn block_origin(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.repos.quota.set_blocked(&origin, true).await?;

    tracing::info!(origin = %origin, "origin blocked");

    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler]
async fn unblock_origin(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(origin): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.repos.quota.set_blocked(&origin, false).await?;

    tracing::info!(origin = %origin, "origin unblocked");

    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler]
async fn drop_access_log(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entries = state.repos.access_log.list_for_token(&token, 100).await?;

    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use mockall::predicate::eq;

    use crate::repos::{MockAccessLogRepo, MockDropRepo, MockQuotaRepo};
    use crate::test_utils::TestStateBuilder;

    #[tokio::test]
    async fn sweep_now_returns_the_report_counts() {
        let mut drops = MockDropRepo::new();
        drops.expect_expire_overdue().returning(|| Ok(3));
        drops.expect_list_reclaimable().returning(|_, _| Ok(Vec::new()));
        let state = TestStateBuilder::new().with_drop_repo(drops).build();

        let result = sweep_now(AdminAuth, State(state)).await.unwrap();

        assert_eq!(result.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn reset_quota_404s_for_an_unknown_origin() {
        let mut quota = MockQuotaRepo::new();
        quota.expect_reset().returning(|_| Ok(false));
        let state = TestStateBuilder::new().with_quota_repo(quota).build();

        let result = reset_quota(AdminAuth, State(state), Path("ip:1.2.3.4".into())).await;

        assert!(matches!(
            result,
            Err(AppError::External(StatusCode::NOT_FOUND, _))
        ));
    }

    #[tokio::test]
    async fn block_and_unblock_flip_the_flag() {
        let mut quota = MockQuotaRepo::new();
        quota
            .expect_set_blocked()
            .with(eq("ip:1.2.3.4"), eq(true))
            .returning(|_, _| Ok(()));
        let state = TestStateBuilder::new().with_quota_repo(quota).build();
        let result = block_origin(AdminAuth, State(state), Path("ip:1.2.3.4".into()))
            .await
            .unwrap();
        assert_eq!(result.into_response().status(), StatusCode::NO_CONTENT);

        let mut quota = MockQuotaRepo::new();
        quota
            .expect_set_blocked()
            .with(eq("ip:1.2.3.4"), eq(false))
            .returning(|_, _| Ok(()));
        let state = TestStateBuilder::new().with_quota_repo(quota).build();
        let result = unblock_origin(AdminAuth, State(state), Path("ip:1.2.3.4".into()))
            .await
            .unwrap();
        assert_eq!(result.into_response().status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn drop_access_log_lists_recent_attempts() {
        let mut access_log = MockAccessLogRepo::new();
        access_log
            .expect_list_for_token()
            .with(eq("tok"), eq(100))
            .returning(|_, _| Ok(Vec::new()));
        let state = TestStateBuilder::new()
            .with_access_log_repo(access_log)
            .build();

        let result = drop_access_log(AdminAuth, State(state), Path("tok".into()))
            .await
            .unwrap();

        assert_eq!(result.into_response().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_auth_requires_the_configured_token() {
        let mut state = TestStateBuilder::new().build();
        state.config.admin_token = Some("sekrit".into());

        let mut parts = Request::builder()
            .header("authorization", "Bearer sekrit")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        assert!(
            AdminAuth::from_request_parts(&mut parts, &state)
                .await
                .is_ok()
        );

        let mut parts = Request::builder()
            .header("authorization", "Bearer wrong")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        assert!(matches!(
            AdminAuth::from_request_parts(&mut parts, &state).await,
            Err(AppError::External(StatusCode::UNAUTHORIZED, _))
        ));
    }

    #[tokio::test]
    async fn admin_routes_vanish_without_a_configured_token() {
        let state = TestStateBuilder::new().build();

        let mut parts = Request::builder()
            .header("authorization", "Bearer anything")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        assert!(matches!(
            AdminAuth::from_request_parts(&mut parts, &state).await,
            Err(AppError::External(StatusCode::NOT_FOUND, _))
        ));
    }
}
