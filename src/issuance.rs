//! Issuance service (C6, §4.6): drives the credential-issuance OAuth/PKCE
//! flow and persists metadata on a successful callback.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{Cache, CachePartition};
use crate::error::{Error, Result};
use crate::gateway::GatewayClient;
use crate::jwt::JwtDecoder;
use crate::model::{CredentialContent, CredentialMetadata, CredentialPayload, RecordFingerprint};
use crate::signing::generate_pkce_pair;
use crate::store::MetadataStore;

fn credential_key(state: &str) -> String {
    format!("credential:{state}")
}

fn trainee_key(state: &str) -> String {
    format!("trainee:{state}")
}

fn client_state_key(state: &str) -> String {
    format!("client-state:{state}")
}

fn code_verifier_key(state: &str) -> String {
    format!("code-verifier:{state}")
}

/// The terminal outcome of an issuance callback, so faults can be
/// attributed to a specific step in tests rather than inferred from side
/// effects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssuanceState {
    /// Metadata persisted.
    Persisted,
    /// Terminal failure, attributed to the stage it failed at.
    Failed(&'static str),
}

/// Claims carried by the caller's bearer token, as much as C6 needs.
#[derive(Deserialize)]
struct TraineeClaims {
    #[serde(rename = "custom:tisId")]
    tis_id: String,
}

/// Claims returned in the gateway's issuance token, once exchanged.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayIssuanceClaims {
    #[serde(rename = "SerialNumber")]
    serial_number: String,
    iat: i64,
}

/// Claims signed into the PAR request JWT (§4.6 step 4).
#[derive(Serialize)]
struct ParClaims<'a> {
    scope: &'a str,
    nonce: &'a str,
    response_type: &'static str,
    code_challenge: &'a str,
    code_challenge_method: &'static str,
    redirect_uri: &'a str,
    #[serde(rename = "tisId")]
    tis_id: &'a str,
    exp: i64,
}

/// Drives the credential issuance flow described in §4.6.
#[derive(Clone)]
pub struct IssuanceService<C: Cache, S: MetadataStore> {
    cache: C,
    jwt: JwtDecoder<C>,
    gateway: GatewayClient,
    store: S,
    signing_key: String,
    issuing_redirect_uri: String,
    credential_metadata_ttl: Duration,
}

impl<C: Cache + Clone, S: MetadataStore> IssuanceService<C, S> {
    /// Build an issuance service backed by `cache`, `jwt`, `gateway` and
    /// `store`.
    pub fn new(
        cache: C, jwt: JwtDecoder<C>, gateway: GatewayClient, store: S, signing_key: String,
        issuing_redirect_uri: String, credential_metadata_ttl: Duration,
    ) -> Self {
        Self { cache, jwt, gateway, store, signing_key, issuing_redirect_uri, credential_metadata_ttl }
    }

    /// Start an issuance flow, returning the gateway authorize URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] if `auth_token` does not decode, or a
    /// cache/gateway error on the underlying operations.
    pub async fn start(
        &self, auth_token: &str, credential: CredentialPayload, client_state: Option<String>,
    ) -> Result<String> {
        let trainee: TraineeClaims = self.jwt.decode(auth_token).await?;

        let state = Uuid::new_v4().to_string();
        let nonce = Uuid::new_v4().to_string();
        let (code_verifier, code_challenge) = generate_pkce_pair();

        self.cache
            .put_with_ttl(CachePartition::CredentialMetadata, &credential_key(&state), &credential, self.credential_metadata_ttl)
            .await?;
        self.cache
            .put_with_ttl(CachePartition::CredentialMetadata, &trainee_key(&state), &trainee.tis_id, self.credential_metadata_ttl)
            .await?;
        self.cache
            .put_with_ttl(CachePartition::CredentialMetadata, &client_state_key(&state), &client_state, self.credential_metadata_ttl)
            .await?;
        self.cache
            .put_with_ttl(
                CachePartition::CredentialMetadata,
                &code_verifier_key(&state),
                &code_verifier,
                self.credential_metadata_ttl,
            )
            .await?;

        let content = credential.content();
        let scope = format!("issue.{}", content.credential_type().issuance_scope_suffix());
        let claims = ParClaims {
            scope: &scope,
            nonce: &nonce,
            response_type: "code",
            code_challenge: &code_challenge,
            code_challenge_method: "S256",
            redirect_uri: &self.issuing_redirect_uri,
            tis_id: content.tis_id(),
            exp: content.expires_at().timestamp(),
        };
        let key = EncodingKey::from_rsa_pem(self.signing_key.as_bytes()).map_err(|e| Error::Internal(e.into()))?;
        let request_jwt =
            encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|e| Error::Internal(e.into()))?;

        let par = self.gateway.par(&request_jwt).await?;
        info!(%state, "issuance started");

        Ok(self.gateway.authorize_uri_v1(&[("request_uri", par.request_uri.as_str()), ("state", state.as_str())]))
    }

    /// Complete an issuance flow from the gateway callback.
    ///
    /// Returns the configured redirect URI, carrying either `code` and
    /// `state` on success, or `error` on failure.
    ///
    /// # Errors
    ///
    /// Returns an error only for cache/gateway/store connectivity failures.
    pub async fn complete(&self, code: &str, state: &str) -> Result<String> {
        let (redirect, _) = self.complete_with_state(code, state).await?;
        Ok(redirect)
    }

    async fn complete_with_state(&self, code: &str, state: &str) -> Result<(String, IssuanceState)> {
        let credential: Option<CredentialPayload> =
            self.cache.take_once(CachePartition::CredentialMetadata, &credential_key(state)).await?;
        let trainee_id: Option<String> =
            self.cache.take_once(CachePartition::CredentialMetadata, &trainee_key(state)).await?;
        let client_state: Option<String> =
            self.cache.take_once(CachePartition::CredentialMetadata, &client_state_key(state)).await?;
        let code_verifier: Option<String> =
            self.cache.take_once(CachePartition::CredentialMetadata, &code_verifier_key(state)).await?;

        let (Some(credential), Some(trainee_id), Some(code_verifier)) = (credential, trainee_id, code_verifier)
        else {
            return Ok((self.error_redirect("no_code_verifier"), IssuanceState::Failed("no_code_verifier")));
        };

        let token = match self.gateway.exchange_token(code, &code_verifier).await {
            Ok(token) => token,
            Err(err) => {
                warn!(%state, error = %err, "issuance token exchange failed");
                return Ok((self.error_redirect("token_exchange_failed"), IssuanceState::Failed("token_exchange")));
            }
        };

        let claims: GatewayIssuanceClaims = match self.jwt.decode(&token.token).await {
            Ok(claims) => claims,
            Err(_) => return Ok((self.error_redirect("invalid_token"), IssuanceState::Failed("token_decode"))),
        };
        let Ok(credential_id) = Uuid::parse_str(&claims.serial_number) else {
            return Ok((self.error_redirect("invalid_token"), IssuanceState::Failed("token_decode")));
        };
        let Some(issued_at) = DateTime::<Utc>::from_timestamp(claims.iat, 0) else {
            return Ok((self.error_redirect("invalid_token"), IssuanceState::Failed("token_decode")));
        };

        let content = credential.content();
        let metadata = CredentialMetadata {
            credential_id,
            credential_type: content.credential_type(),
            tis_id: content.tis_id().to_string(),
            trainee_id,
            issued_at,
            expires_at: content.expires_at(),
            revoked_at: None,
            revocation_pending: false,
        };

        if self.store.insert_credential(metadata).await.is_err() {
            return Ok((self.error_redirect("persistence_failed"), IssuanceState::Failed("persist")));
        }

        self.store
            .put_fingerprint(RecordFingerprint {
                tis_id: content.tis_id().to_string(),
                credential_type: content.credential_type(),
                last_modified_content_hash: None,
                last_modified_at: Utc::now(),
            })
            .await?;

        info!(%state, %credential_id, "credential issued");

        let mut redirect = format!("{}?code={}", self.issuing_redirect_uri, urlencoding::encode(code));
        if let Some(client_state) = client_state {
            redirect.push_str("&state=");
            redirect.push_str(&urlencoding::encode(&client_state));
        }
        Ok((redirect, IssuanceState::Persisted))
    }

    fn error_redirect(&self, reason: &str) -> String {
        format!("{}?error={}", self.issuing_redirect_uri, urlencoding::encode(reason))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn par_claims_scope_uses_issuance_suffix() {
        let scope = format!("issue.{}", crate::model::CredentialType::Placement.issuance_scope_suffix());
        assert_eq!(scope, "issue.Placement");
    }

    #[tokio::test]
    async fn missing_code_verifier_redirects_with_error() {
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
        let store = crate::store::InMemoryMetadataStore::new();
        let service = IssuanceService::new(
            cache,
            jwt,
            gateway,
            store,
            "irrelevant".into(),
            "https://app.example/issue/callback".into(),
            Duration::from_secs(600),
        );

        let (redirect, stage) =
            service.complete_with_state("code-1", "unknown-state").await.expect("should not error");
        assert_eq!(redirect, "https://app.example/issue/callback?error=no_code_verifier");
        assert_eq!(stage, IssuanceState::Failed("no_code_verifier"));
    }

    #[test]
    fn issuance_states_are_distinct() {
        // Every stage `complete_with_state` actually returns, asserted distinct
        // so fault-injection tests elsewhere can match on a specific stage.
        let stages = [
            IssuanceState::Persisted,
            IssuanceState::Failed("no_code_verifier"),
            IssuanceState::Failed("token_exchange"),
            IssuanceState::Failed("token_decode"),
            IssuanceState::Failed("persist"),
        ];
        for (i, a) in stages.iter().enumerate() {
            for (j, b) in stages.iter().enumerate() {
                assert_eq!(i == j, a == b);
            }
        }
    }
}
