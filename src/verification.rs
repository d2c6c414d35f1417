//! Verification service (C5, §4.5): drives the identity-verification
//! OAuth/PKCE flow and performs fuzzy identity matching on callback.

use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CachePartition};
use crate::error::Result;
use crate::gateway::GatewayClient;
use crate::identity_match::{IdentityClaims, match_identity};
use crate::jwt::JwtDecoder;
use crate::model::IdentityData;
use crate::signing::generate_pkce_pair;

fn identity_key(nonce: &str) -> String {
    format!("identity:{nonce}")
}

fn session_key(nonce: &str) -> String {
    format!("session:{nonce}")
}

fn client_state_key(state: &str) -> String {
    format!("client-state:{state}")
}

fn code_verifier_key(state: &str) -> String {
    format!("code-verifier:{state}")
}

/// Claims carried by the caller's bearer token, as much as C5 needs.
#[derive(Deserialize)]
struct BearerClaims {
    jti: String,
}

/// Claims returned in the gateway's identity token, once exchanged.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayIdentityClaims {
    nonce: String,
    forenames: String,
    surname: String,
    date_of_birth: NaiveDate,
    #[serde(default, rename = "UniqueIdentifier")]
    unique_identifier: Option<String>,
}

/// Drives the identity verification flow described in §4.5.
#[derive(Clone)]
pub struct VerificationService<C: Cache> {
    cache: C,
    jwt: JwtDecoder<C>,
    gateway: GatewayClient,
    verification_request_ttl: Duration,
    verified_session_ttl: Duration,
}

impl<C: Cache + Clone> VerificationService<C> {
    /// Build a verification service backed by `cache`, `jwt` and `gateway`,
    /// using the TTLs configured for the `verification-request` and
    /// `verified-session` logical caches.
    pub const fn new(
        cache: C, jwt: JwtDecoder<C>, gateway: GatewayClient, verification_request_ttl: Duration,
        verified_session_ttl: Duration,
    ) -> Self {
        Self { cache, jwt, gateway, verification_request_ttl, verified_session_ttl }
    }

    /// Start an identity verification flow, returning the gateway authorize
    /// URI to redirect the caller to.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::InvalidToken`] if `auth_token` does not
    /// decode, or a cache/gateway error on the underlying operations.
    pub async fn start(
        &self, auth_token: &str, identity: IdentityData, client_state: Option<String>,
    ) -> Result<String> {
        let bearer: BearerClaims = self.jwt.decode(auth_token).await?;

        let nonce = Uuid::new_v4().to_string();
        let state = Uuid::new_v4().to_string();
        let (code_verifier, code_challenge) = generate_pkce_pair();

        self.cache
            .put_with_ttl(CachePartition::VerificationRequest, &identity_key(&nonce), &identity, self.verification_request_ttl)
            .await?;
        self.cache
            .put_with_ttl(
                CachePartition::VerificationRequest,
                &session_key(&nonce),
                &bearer.jti,
                self.verification_request_ttl,
            )
            .await?;
        self.cache
            .put_with_ttl(
                CachePartition::VerificationRequest,
                &client_state_key(&state),
                &client_state,
                self.verification_request_ttl,
            )
            .await?;
        self.cache
            .put_with_ttl(
                CachePartition::VerificationRequest,
                &code_verifier_key(&state),
                &code_verifier,
                self.verification_request_ttl,
            )
            .await?;

        info!(%nonce, %state, "identity verification started");

        Ok(self.gateway.authorize_uri(&[
            ("nonce", nonce.as_str()),
            ("state", state.as_str()),
            ("code_challenge", code_challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("scope", "openid Identity"),
        ]))
    }

    /// Complete an identity verification flow from the gateway callback.
    ///
    /// Returns a relative redirect target (`/credential-verified` or
    /// `/invalid-credential?reason=...`), optionally carrying the caller's
    /// original `state` query parameter back.
    ///
    /// # Errors
    ///
    /// Returns an error only for cache/gateway connectivity failures; domain
    /// failures (stale/missing code verifier, failed identity match) are
    /// reported via the returned redirect target, not as `Err`.
    pub async fn complete(
        &self, code: Option<&str>, state: &str, error: Option<&str>, error_description: Option<&str>,
    ) -> Result<String> {
        if error.is_some() {
            return self.finish(state, error_description.or(error)).await;
        }

        let Some(code) = code else {
            return self.finish(state, Some("missing_code")).await;
        };

        let Some(code_verifier) =
            self.cache.take_once::<String>(CachePartition::VerificationRequest, &code_verifier_key(state)).await?
        else {
            return self.finish(state, Some("no_code_verifier")).await;
        };

        let token = match self.gateway.exchange_token(code, &code_verifier).await {
            Ok(token) => token,
            Err(err) => {
                warn!(%state, error = %err, "token exchange failed");
                return self.finish(state, Some("token_exchange_failed")).await;
            }
        };

        if !(token.scope.starts_with("openid ") && token.scope.ends_with("Identity")) {
            return self.finish(state, Some("unsupported_scope")).await;
        }

        let claims: GatewayIdentityClaims = match self.jwt.decode(&token.token).await {
            Ok(claims) => claims,
            Err(_) => return self.finish(state, Some("identity_verification_failed")).await,
        };

        let Some(identity): Option<IdentityData> =
            self.cache.take_once(CachePartition::VerificationRequest, &identity_key(&claims.nonce)).await?
        else {
            return self.finish(state, Some("identity_verification_failed")).await;
        };

        let result = match_identity(&identity, &IdentityClaims {
            forenames: claims.forenames,
            surname: claims.surname,
            date_of_birth: claims.date_of_birth,
            unique_identifier: claims.unique_identifier.clone(),
        });

        self.finish_match(state, &claims.nonce, result.is_match(), claims.unique_identifier).await
    }

    /// Tail end of [`Self::complete`], once identity matching has run:
    /// upgrade the session on a match, fail closed otherwise. Split out so
    /// the `UnverifiedSessionId`-expiry case (§9 Open Question (a)) can be
    /// exercised without a gateway/JWT round trip.
    async fn finish_match(
        &self, state: &str, nonce: &str, is_match: bool, unique_identifier: Option<String>,
    ) -> Result<String> {
        if !is_match {
            return self.finish(state, Some("identity_verification_failed")).await;
        }

        let Some(origin_jti) =
            self.cache.take_once::<String>(CachePartition::VerificationRequest, &session_key(nonce)).await?
        else {
            return self.finish(state, Some("identity_verification_failed")).await;
        };

        let unique_identifier = unique_identifier.unwrap_or_default();
        self.cache
            .put_with_ttl(CachePartition::VerifiedSession, &origin_jti, &unique_identifier, self.verified_session_ttl)
            .await?;
        info!(%origin_jti, "identity verified");

        self.finish(state, None).await
    }

    /// `true` iff `origin_jti` has a verified-session marker (§4.4, §4.5).
    ///
    /// # Errors
    ///
    /// Returns an error only on a cache connectivity failure.
    pub async fn has_verified_session(&self, origin_jti: &str) -> Result<bool> {
        let record: Option<String> = self.cache.peek(CachePartition::VerifiedSession, origin_jti).await?;
        Ok(record.is_some())
    }

    async fn finish(&self, state: &str, reason: Option<&str>) -> Result<String> {
        let client_state: Option<String> =
            self.cache.take_once(CachePartition::VerificationRequest, &client_state_key(state)).await?;

        let mut path = reason.map_or_else(
            || "/credential-verified".to_string(),
            |reason| format!("/invalid-credential?reason={}", urlencoding::encode(reason)),
        );
        if let Some(client_state) = client_state {
            path.push(if path.contains('?') { '&' } else { '?' });
            path.push_str("state=");
            path.push_str(&urlencoding::encode(&client_state));
        }
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn finish_appends_client_state_when_present() {
        let cache = crate::cache::MemoryCache::new();
        cache
            .put_with_ttl(
                CachePartition::VerificationRequest,
                &client_state_key("state-1"),
                &Some("original-state".to_string()),
                Duration::from_secs(60),
            )
            .await
            .expect("should seed client state");

        let gateway = GatewayClient::new(crate::config::GatewayConfig {
            host: "https://gateway.example".into(),
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            token_signing_key: "key".into(),
            issuing_redirect_uri: "https://app.example/issue/callback".into(),
            verification_redirect_uri: "https://app.example/verify/callback".into(),
        });
        let jwt = JwtDecoder::new(cache.clone(), gateway.clone(), None);
        let service = VerificationService::new(
            cache,
            jwt,
            gateway,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );

        let redirect = service.finish("state-1", None).await.expect("should build redirect");
        assert_eq!(redirect, "/credential-verified?state=original-state");
    }

    #[tokio::test]
    async fn finish_match_fails_closed_when_session_id_expired() {
        let cache = crate::cache::MemoryCache::new();
        let gateway = GatewayClient::new(crate::config::GatewayConfig {
            host: "https://gateway.example".into(),
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            token_signing_key: "key".into(),
            issuing_redirect_uri: "https://app.example/issue/callback".into(),
            verification_redirect_uri: "https://app.example/verify/callback".into(),
        });
        let jwt = JwtDecoder::new(cache.clone(), gateway.clone(), None);
        let service =
            VerificationService::new(cache, jwt, gateway, Duration::from_secs(300), Duration::from_secs(600));

        // Matching identity claims, but no `UnverifiedSessionId` entry was
        // ever put under this nonce (expired or never set) - must redirect to
        // the failure path, not the success one.
        let redirect = service
            .finish_match("state-1", "nonce-1", true, Some("unique-id".into()))
            .await
            .expect("should build redirect");
        assert_eq!(redirect, "/invalid-credential?reason=identity_verification_failed");
    }

    #[tokio::test]
    async fn finish_without_client_state_omits_query() {
        let cache = crate::cache::MemoryCache::new();
        let gateway = GatewayClient::new(crate::config::GatewayConfig {
            host: "https://gateway.example".into(),
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            token_signing_key: "key".into(),
            issuing_redirect_uri: "https://app.example/issue/callback".into(),
            verification_redirect_uri: "https://app.example/verify/callback".into(),
        });
        let jwt = JwtDecoder::new(cache.clone(), gateway.clone(), None);
        let service = VerificationService::new(
            cache,
            jwt,
            gateway,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );

        let redirect =
            service.finish("state-missing", Some("identity_verification_failed")).await.expect("should build redirect");
        assert_eq!(redirect, "/invalid-credential?reason=identity_verification_failed");
    }
}
