//! Signed-data filter (C3, §4.3): verifies the HMAC over inbound write
//! bodies and, for `/api/issue/*`, cross-checks data freshness against the
//! revocation ledger. Skipped for `/callback` routes (wired in
//! [`crate::http::routes`]).

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Error;
use crate::http::response::AxResult;
use crate::http::state::AppState;
use crate::model::CredentialType;
use crate::signing;
use crate::store;

#[derive(Deserialize)]
struct SignatureEnvelope {
    signature: signing::Signature,
    #[serde(rename = "tisId", default)]
    tis_id: Option<String>,
}

fn credential_type_for(uri: &Uri) -> Option<CredentialType> {
    match uri.path() {
        "/api/issue/placement" => Some(CredentialType::Placement),
        "/api/issue/programme-membership" => Some(CredentialType::ProgrammeMembership),
        _ => None,
    }
}

/// Admit a write request only if its body carries a valid, fresh HMAC
/// signature. On rejection, returns 403 without invoking `next`.
pub async fn verify_signature(
    State(state): State<AppState>, request: Request, next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, usize::MAX).await else {
        return AxResult::<()>::from(Err(Error::SignatureInvalid)).into_response();
    };

    match check(&state, &parts.uri, &bytes).await {
        Ok(()) => {
            let request = Request::from_parts(parts, Body::from(bytes));
            next.run(request).await
        }
        Err(err) => AxResult::<()>::from(Err(err)).into_response(),
    }
}

async fn check(state: &AppState, uri: &Uri, bytes: &Bytes) -> crate::error::Result<()> {
    let body: serde_json::Value = serde_json::from_slice(bytes).map_err(|_| Error::SignatureInvalid)?;
    let envelope: SignatureEnvelope = serde_json::from_value(body.clone()).map_err(|_| Error::SignatureInvalid)?;

    let now = Utc::now();
    if !(envelope.signature.signed_at <= now && now < envelope.signature.valid_until) {
        return Err(Error::SignatureStale);
    }

    let canonical = signing::canonicalize(&body).map_err(|_| Error::SignatureInvalid)?;
    if !signing::verify(state.config.signature_secret_key.as_bytes(), &canonical, &envelope.signature.hmac) {
        return Err(Error::SignatureInvalid);
    }

    if let Some(credential_type) = credential_type_for(uri) {
        let tis_id = envelope.tis_id.ok_or(Error::SignatureInvalid)?;
        let last_modified = store::last_modified_date(&state.metadata_store, &tis_id, credential_type).await?;
        if let Some(last_modified) = last_modified {
            if !is_fresh(last_modified, envelope.signature.signed_at) {
                return Err(Error::SignatureStale);
            }
        }
    }

    Ok(())
}

fn is_fresh(last_modified_at: DateTime<Utc>, signed_at: DateTime<Utc>) -> bool {
    last_modified_at < signed_at
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn credential_type_maps_known_issue_paths() {
        let uri: Uri = "/api/issue/placement".parse().expect("valid uri");
        assert_eq!(credential_type_for(&uri), Some(CredentialType::Placement));
        let uri: Uri = "/api/issue/programme-membership".parse().expect("valid uri");
        assert_eq!(credential_type_for(&uri), Some(CredentialType::ProgrammeMembership));
        let uri: Uri = "/api/verify/identity".parse().expect("valid uri");
        assert_eq!(credential_type_for(&uri), None);
    }

    #[test]
    fn freshness_requires_last_modified_strictly_before_signed_at() {
        let signed_at = Utc::now();
        let earlier = signed_at - chrono::Duration::seconds(1);
        let later = signed_at + chrono::Duration::seconds(1);
        assert!(is_fresh(earlier, signed_at));
        assert!(!is_fresh(signed_at, signed_at));
        assert!(!is_fresh(later, signed_at));
    }
}
