//! Error kinds for the trust-broker core.
//!
//! One variant per §7 error kind. Handlers translate a variant to an HTTP
//! response via [`crate::http::response::AxResult`]; this module only knows
//! about the domain shape, not about axum.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Domain error kinds the broker core can raise.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation failure on caller-supplied input. HTTP 400 with a
    /// `{field: message}` map.
    #[error("bad request: {0:?}")]
    BadRequest(HashMap<String, String>),

    /// HMAC over the request body did not match `signature.hmac`. HTTP 403.
    #[error("signature invalid")]
    SignatureInvalid,

    /// Signature was valid but the record's `lastModifiedAt` is not older
    /// than `signedAt`, or `signedAt`/`validUntil` are out of range. HTTP 403.
    #[error("signature stale")]
    SignatureStale,

    /// Missing/invalid bearer or absent verified session. HTTP 401. `realm`
    /// is echoed into `WWW-Authenticate`.
    #[error("unauthenticated")]
    Unauthenticated {
        /// Realm advertised in the `WWW-Authenticate` challenge.
        realm: &'static str,
    },

    /// The gateway did not respond within its deadline, or after retries.
    /// Retryable; HTTP 502 if exhausted on a write path.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// A required read-evict cache entry was absent. Carries the
    /// flow-specific `reason` query value (e.g. `no_code_verifier`).
    #[error("cache miss: {0}")]
    CacheMiss(&'static str),

    /// JWT was malformed, signed with an unknown key, had an invalid
    /// signature, or was expired.
    #[error("invalid token")]
    InvalidToken,

    /// Revocation could not reach the gateway after exhausting retries; the
    /// record is left `revocation-pending`. Internal only - the event
    /// listener nacks the message.
    #[error("revocation pending")]
    RevocationPending,

    /// Unexpected infrastructure failure (cache/store connectivity, codec
    /// errors) not covered by a more specific variant above.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl Error {
    /// Build a [`Error::BadRequest`] with a single field/message pair.
    #[must_use]
    pub fn bad_request(field: &str, message: impl Into<String>) -> Self {
        Self::BadRequest(HashMap::from([(field.to_string(), message.into())]))
    }

    /// `true` for error kinds whose underlying cause may succeed if retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::RevocationPending)
    }
}

/// `{field: message}` shape used by [`Error::BadRequest`] responses.
#[derive(Serialize)]
#[serde(transparent)]
pub(crate) struct FieldErrors<'a>(pub &'a HashMap<String, String>);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bad_request_shape() {
        let err = Error::bad_request("dateOfBirth", "must be an ISO date");
        let Error::BadRequest(fields) = &err else {
            panic!("should be a BadRequest");
        };
        assert_eq!(fields.get("dateOfBirth").map(String::as_str), Some("must be an ISO date"));
    }

    #[test]
    fn gateway_unavailable_is_retryable() {
        assert!(Error::GatewayUnavailable("timed out".into()).is_retryable());
        assert!(Error::RevocationPending.is_retryable());
        assert!(!Error::InvalidToken.is_retryable());
    }
}
