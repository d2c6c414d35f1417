//! Verified-session filter (C4, §4.4): admits a request only if its bearer
//! carries a verified-session marker. Skipped for `/callback` routes (wired
//! in [`crate::http::routes`]).

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::Error;
use crate::http::response::AxResult;
use crate::http::state::AppState;

const REALM: &str = "/api/verify/identity";

#[derive(Deserialize)]
struct BearerClaims {
    jti: String,
}

/// Admit the request iff its bearer's `jti` has a live verified-session
/// entry (read via `peek`, never evicted by this check).
pub async fn require_verified_session(
    State(state): State<AppState>, request: Request, next: Next,
) -> Response {
    match check(&state, &request).await {
        Ok(()) => next.run(request).await,
        Err(err) => AxResult::<()>::from(Err(err)).into_response(),
    }
}

async fn check(state: &AppState, request: &Request) -> crate::error::Result<()> {
    let unauthenticated = || Error::Unauthenticated { realm: REALM };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(unauthenticated)?;

    let claims: BearerClaims = state.jwt.decode(token).await.map_err(|_| unauthenticated())?;

    let verified = state.verification.has_verified_session(&claims.jti).await?;
    if verified { Ok(()) } else { Err(unauthenticated()) }
}

#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::Request as HttpRequest;

    use super::*;

    #[test]
    fn bearer_prefix_is_stripped() {
        let header = "Bearer abc.def.ghi";
        assert_eq!(header.strip_prefix("Bearer "), Some("abc.def.ghi"));
    }

    #[test]
    fn request_without_authorization_header_has_no_token() {
        let request = HttpRequest::builder().uri("/api/issue/placement").body(Body::empty()).expect("valid request");
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }
}
