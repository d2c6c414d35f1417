//! `AxResult` (§4.11, §7): the wrapper handlers return to translate the
//! domain [`Error`] into an HTTP response, the same shape the teacher's own
//! example binaries use (`examples/issuer/src/main.rs`,
//! `examples/verifier/src/main.rs`).

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use crate::error::{Error, FieldErrors, Result};

/// Wrapper for `axum::Response`; converts the domain [`Result`] into a
/// status code and JSON body per §7's error kind table.
pub struct AxResult<T>(Result<T>);

impl<T> IntoResponse for AxResult<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self.0 {
            Ok(value) => (StatusCode::OK, Json(json!(value))).into_response(),
            Err(err) => error_response(&err),
        }
    }
}

impl<T> From<Result<T>> for AxResult<T> {
    fn from(val: Result<T>) -> Self {
        Self(val)
    }
}

fn error_response(err: &Error) -> Response {
    match err {
        Error::BadRequest(fields) => {
            (StatusCode::BAD_REQUEST, Json(json!(FieldErrors(fields)))).into_response()
        }
        Error::SignatureInvalid | Error::SignatureStale => {
            (StatusCode::FORBIDDEN, Json(json!({"error": err.to_string()}))).into_response()
        }
        Error::Unauthenticated { realm } => {
            let mut response =
                (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthenticated"}))).into_response();
            let challenge = format!(r#"IdentityVerification realm="{realm}""#);
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
            response
        }
        Error::GatewayUnavailable(_) => {
            (StatusCode::BAD_GATEWAY, Json(json!({"error": "gateway unavailable"}))).into_response()
        }
        Error::InvalidToken | Error::CacheMiss(_) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()}))).into_response()
        }
        Error::RevocationPending | Error::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "internal error"}))).into_response()
        }
    }
}

#[cfg(test)]
mod test {
    use axum::body::to_bytes;

    use super::*;

    #[tokio::test]
    async fn bad_request_maps_to_400_with_field_errors() {
        let result: AxResult<()> = AxResult(Err(Error::bad_request("dateOfBirth", "must be an ISO date")));
        let response = result.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("should read body");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("should be json");
        assert_eq!(value["dateOfBirth"], "must be an ISO date");
    }

    #[tokio::test]
    async fn unauthenticated_carries_www_authenticate_realm() {
        let result: AxResult<()> = AxResult(Err(Error::Unauthenticated { realm: "/api/verify/identity" }));
        let response = result.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response.headers().get(header::WWW_AUTHENTICATE).expect("should set header");
        assert_eq!(challenge, r#"IdentityVerification realm="/api/verify/identity""#);
    }

    #[tokio::test]
    async fn gateway_unavailable_maps_to_502() {
        let result: AxResult<()> = AxResult(Err(Error::GatewayUnavailable("timed out".into())));
        assert_eq!(result.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn ok_value_maps_to_200() {
        let result: AxResult<&str> = AxResult(Ok("done"));
        assert_eq!(result.into_response().status(), StatusCode::OK);
    }
}
