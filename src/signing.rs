//! HMAC canonicalisation and verification shared between the signed-data
//! filter (C3) and the test-side signer (SPEC_FULL §9: this routine must be
//! identical on both sides).

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Generate a PKCE code verifier (32 random bytes, base64url, unpadded) and
/// its S256 challenge, shared by the verification (C5) and issuance (C6)
/// flows.
#[must_use]
pub fn generate_pkce_pair() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let code_verifier = Base64UrlUnpadded::encode_string(&bytes);
    let digest = Sha256::digest(code_verifier.as_bytes());
    let code_challenge = Base64UrlUnpadded::encode_string(&digest);
    (code_verifier, code_challenge)
}

/// The `signature` object carried alongside every signed request body.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Signature {
    /// Hex-encoded HMAC-SHA256 of the canonicalised body, `hmac` removed.
    pub hmac: String,
    /// When the request was signed.
    pub signed_at: DateTime<Utc>,
    /// The instant after which the signature is no longer valid.
    pub valid_until: DateTime<Utc>,
}

/// Deterministically re-serialise `body` with its top-level `signature.hmac`
/// field removed, keys sorted, and no insignificant whitespace, so the
/// signer and the verifier always hash the same bytes.
///
/// # Errors
///
/// Returns an error if `body` is not a JSON object or does not contain a
/// `signature` object.
pub fn canonicalize(body: &serde_json::Value) -> Result<Vec<u8>, CanonicalizeError> {
    let mut value = body.clone();
    let object = value.as_object_mut().ok_or(CanonicalizeError::NotAnObject)?;
    let signature = object.get_mut("signature").ok_or(CanonicalizeError::MissingSignature)?;
    let signature_object = signature.as_object_mut().ok_or(CanonicalizeError::MissingSignature)?;
    signature_object.remove("hmac");

    // `serde_json::Value`'s `Object` is a `BTreeMap` (or preserves insertion
    // order without the `preserve_order` feature disabled elsewhere in the
    // dependency graph); re-parsing through `BTreeMap` guarantees sorted
    // keys regardless of which one is in effect.
    let sorted: std::collections::BTreeMap<String, serde_json::Value> =
        serde_json::from_value(value).map_err(|_| CanonicalizeError::NotAnObject)?;
    serde_json::to_vec(&sorted).map_err(|_| CanonicalizeError::NotAnObject)
}

/// Compute the hex-encoded HMAC-SHA256 of `canonical` keyed by `secret`.
#[must_use]
pub fn hmac_hex(secret: &[u8], canonical: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(canonical);
    hex_encode(&mac.finalize().into_bytes())
}

/// Verify that `expected_hex` equals the HMAC-SHA256 of `canonical` keyed
/// by `secret`, in constant time.
#[must_use]
pub fn verify(secret: &[u8], canonical: &[u8], expected_hex: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any length");
    mac.update(canonical);
    let Ok(expected_bytes) = hex_decode(expected_hex) else {
        return false;
    };
    mac.verify_slice(&expected_bytes).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

/// Reasons [`canonicalize`] can fail.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalizeError {
    /// The body was not a JSON object.
    #[error("request body is not a JSON object")]
    NotAnObject,
    /// The body had no `signature` object.
    #[error("request body has no `signature` object")]
    MissingSignature,
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_form_is_sorted_and_strips_hmac() {
        let body = json!({
            "surname": "Gilliam",
            "forenames": "Anthony",
            "signature": {"hmac": "should-be-removed", "signedAt": "2026-01-01T00:00:00Z", "validUntil": "2026-01-02T00:00:00Z"},
        });
        let canonical = canonicalize(&body).expect("should canonicalize");
        let text = String::from_utf8(canonical).expect("utf8");
        assert!(!text.contains("should-be-removed"));
        // BTreeMap ordering puts "forenames" before "signature" before "surname".
        assert!(text.find("forenames").unwrap() < text.find("signature").unwrap());
        assert!(text.find("signature").unwrap() < text.find("surname").unwrap());
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let body = json!({"tisId": "tis-1", "signature": {"hmac": "", "signedAt": "2026-01-01T00:00:00Z", "validUntil": "2026-01-02T00:00:00Z"}});
        let canonical = canonicalize(&body).expect("should canonicalize");
        let secret = b"shared-secret";
        let hmac = hmac_hex(secret, &canonical);
        assert!(verify(secret, &canonical, &hmac));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = json!({"tisId": "tis-1", "signature": {"hmac": "", "signedAt": "2026-01-01T00:00:00Z", "validUntil": "2026-01-02T00:00:00Z"}});
        let canonical = canonicalize(&body).expect("should canonicalize");
        let hmac = hmac_hex(b"correct-secret", &canonical);
        assert!(!verify(b"wrong-secret", &canonical, &hmac));
    }

    #[test]
    fn canonicalize_rejects_missing_signature() {
        let body = json!({"tisId": "tis-1"});
        let err = canonicalize(&body).expect_err("should fail without signature");
        assert!(matches!(err, CanonicalizeError::MissingSignature));
    }

    #[test]
    fn pkce_pair_challenge_is_derived_from_verifier() {
        let (verifier, challenge) = generate_pkce_pair();
        let expected = Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()));
        assert_eq!(challenge, expected);
        assert!(!verifier.contains('='), "base64url output must be unpadded");
    }
}
