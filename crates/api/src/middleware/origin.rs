//! Origin attribution for quota accounting.
//!
//! Usage: add `Origin` as an extractor parameter. A valid API key attributes
//! the request to its account and tier; everything else is attributed by
//! client IP at the free tier. A present-but-invalid key is rejected rather
//! than silently downgraded to IP attribution.
//!
//! ```ignore
//! async fn my_handler(origin: Origin, ...) -> ... {
//!     // origin.identity, origin.tier available here
//! }
//! ```

use axum::{
    Json, RequestPartsExt,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};

use crate::{models::Tier, state::AppState};

/// Who is making the request, for quota and audit purposes.
#[derive(Debug, Clone)]
pub struct Origin {
    /// Quota-ledger key: `account:{id}` or `ip:{addr}`.
    pub identity: String,
    pub tier: Tier,
    /// Client IP, when known. Audit only.
    pub ip: Option<String>,
}

impl FromRequestParts<AppState> for Origin {
    type Rejection = OriginError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ip = client_ip(parts);

        let bearer = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .ok();

        if let Some(TypedHeader(Authorization(bearer))) = bearer {
            let account = state
                .repos
                .accounts
                .find_by_api_key(bearer.token())
                .await
                .map_err(|e| {
                    tracing::error!("account lookup failed: {:?}", e);
                    OriginError::LookupFailed
                })?;

            let account = account.ok_or(OriginError::InvalidToken)?;

            return Ok(Origin {
                identity: format!("account:{}", account.id),
                tier: account.tier,
                ip,
            });
        }

        let Some(ip) = ip else {
            return Err(OriginError::UnknownOrigin);
        };

        Ok(Origin {
            identity: format!("ip:{}", ip),
            tier: Tier::Free,
            ip: Some(ip),
        })
    }
}

/// First hop of X-Forwarded-For (set by the ingress), else X-Real-IP.
fn client_ip(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    forwarded.or_else(|| {
        parts
            .headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Client IP with no attribution requirement, for audit fields on anonymous
/// endpoints (redeem, OTP request).
pub struct CallerIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for CallerIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CallerIp(client_ip(parts)))
    }
}

#[derive(Debug)]
pub enum OriginError {
    InvalidToken,
    UnknownOrigin,
    LookupFailed,
}

impl IntoResponse for OriginError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            OriginError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid API key"),
            OriginError::UnknownOrigin => (
                StatusCode::BAD_REQUEST,
                "Could not determine request origin",
            ),
            OriginError::LookupFailed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = serde_json::json!({ "error": message });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    use crate::repos::MockAccountRepo;
    use crate::test_utils::{TestStateBuilder, mock_account};

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn api_key_attributes_to_the_account() {
        let account = mock_account(Tier::Paid);
        let account_id = account.id;
        let mut accounts = MockAccountRepo::new();
        accounts
            .expect_find_by_api_key()
            .returning(move |_| Ok(Some(account.clone())));
        let state = TestStateBuilder::new().with_account_repo(accounts).build();

        let mut parts = parts(
            Request::builder()
                .header("authorization", "Bearer sk_live_abc")
                .header("x-forwarded-for", "1.2.3.4"),
        );
        let origin = Origin::from_request_parts(&mut parts, &state).await.unwrap();

        assert_eq!(origin.identity, format!("account:{}", account_id));
        assert_eq!(origin.tier, Tier::Paid);
        assert_eq!(origin.ip.as_deref(), Some("1.2.3.4"));
    }

    #[tokio::test]
    async fn unknown_api_key_is_rejected_not_downgraded() {
        let mut accounts = MockAccountRepo::new();
        accounts.expect_find_by_api_key().returning(|_| Ok(None));
        let state = TestStateBuilder::new().with_account_repo(accounts).build();

        let mut parts = parts(
            Request::builder()
                .header("authorization", "Bearer bogus")
                .header("x-forwarded-for", "1.2.3.4"),
        );
        let result = Origin::from_request_parts(&mut parts, &state).await;

        assert!(matches!(result, Err(OriginError::InvalidToken)));
    }

    #[tokio::test]
    async fn anonymous_caller_is_attributed_by_first_forwarded_hop() {
        let state = TestStateBuilder::new().build();

        let mut parts = parts(
            Request::builder().header("x-forwarded-for", "9.9.9.9, 10.0.0.1"),
        );
        let origin = Origin::from_request_parts(&mut parts, &state).await.unwrap();

        assert_eq!(origin.identity, "ip:9.9.9.9");
        assert_eq!(origin.tier, Tier::Free);
    }

    #[tokio::test]
    async fn no_key_and_no_ip_is_an_error() {
        let state = TestStateBuilder::new().build();

        let mut parts = parts(Request::builder());
        let result = Origin::from_request_parts(&mut parts, &state).await;

        assert!(matches!(result, Err(OriginError::UnknownOrigin)));
    }
}
