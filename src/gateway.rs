//! Gateway client (C14, §4.14): a thin `reqwest`-backed wrapper over the
//! six outbound calls to the external credential gateway (§6), with the
//! deadlines of §5 enforced via client-builder timeouts.

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::jwt::Jwks;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound paths on the gateway (§6), relative to [`GatewayConfig::host`].
mod path {
    pub const PAR: &str = "/oidc/par";
    pub const AUTHORIZE: &str = "/oidc/authorize";
    /// Authorize endpoint consulted with a PAR `request_uri` rather than
    /// inline parameters; used by the issuance flow (§4.6), which goes
    /// through PAR (§4.6 step 5), unlike verification's direct-parameter
    /// authorize call (§4.5).
    pub const AUTHORIZEV1: &str = "/oidc/authorizev1";
    pub const TOKEN: &str = "/oidc/token";
    pub const JWKS: &str = "/.well-known/openid-configuration/jwks";
    pub const REVOKE: &str = "/Revocation/revokecredential";
}

/// Response from the gateway's token endpoint.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct TokenResponse {
    /// The opaque/JWT access or id token returned by the gateway.
    pub token: String,
    /// Scope the token was granted for.
    pub scope: String,
}

/// Response from the gateway's PAR endpoint.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct ParResponse {
    /// Opaque reference to the pushed authorization request.
    pub request_uri: String,
}

/// A thin HTTP client for the external credential gateway.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl GatewayClient {
    /// Build a client against `config`, with the §5 deadlines applied.
    ///
    /// # Panics
    ///
    /// Panics if the underlying `reqwest` client cannot be constructed
    /// (only possible from an invalid TLS configuration).
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .expect("reqwest client should build with a valid TLS backend");
        Self { http, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.host)
    }

    /// Submit a Pushed Authorization Request, returning the `request_uri`
    /// to embed in the authorize redirect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayUnavailable`] if the gateway does not
    /// respond successfully within its deadline.
    pub async fn par(&self, signed_request_jwt: &str) -> Result<ParResponse> {
        self.post_form(path::PAR, &[("request", signed_request_jwt), ("client_id", &self.config.client_id)]).await
    }

    /// Build the gateway authorize URI for the given query parameters.
    /// Construction only; never fails.
    #[must_use]
    pub fn authorize_uri(&self, query: &[(&str, &str)]) -> String {
        let qs = url_encode_query(query);
        format!("{}?{qs}", self.url(path::AUTHORIZE))
    }

    /// Build the gateway's PAR-aware authorize URI (`request_uri` + `state`)
    /// used to complete a pushed authorization request (§4.6 step 5).
    #[must_use]
    pub fn authorize_uri_v1(&self, query: &[(&str, &str)]) -> String {
        let qs = url_encode_query(query);
        format!("{}?{qs}", self.url(path::AUTHORIZEV1))
    }

    /// Exchange an authorization `code` and PKCE `code_verifier` for a
    /// token at the gateway's token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayUnavailable`] if the gateway does not
    /// respond successfully within its deadline.
    pub async fn exchange_token(&self, code: &str, code_verifier: &str) -> Result<TokenResponse> {
        self.post_form(
            path::TOKEN,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", code_verifier),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ],
        )
        .await
    }

    /// Fetch the gateway's JSON Web Key Set. Retried once on connection
    /// reset, per §7.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayUnavailable`] if both attempts fail.
    pub async fn fetch_jwks(&self) -> Result<Jwks> {
        let url = self.url(path::JWKS);
        match self.http.get(&url).send().await {
            Ok(resp) => parse_response(resp).await,
            Err(_) => {
                // One retry on connection reset (§7 local recovery).
                let resp = self.http.get(&url).send().await.map_err(gateway_unavailable)?;
                parse_response(resp).await
            }
        }
    }

    /// Revoke a previously issued credential at the gateway, identified by
    /// its surrogate `credential_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GatewayUnavailable`] if the gateway does not
    /// respond successfully within its deadline. Retried by the caller
    /// (C7) per §4.7's backoff schedule, not here.
    pub async fn revoke(&self, credential_id: &str) -> Result<()> {
        let url = self.url(path::REVOKE);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "credentialId": credential_id }))
            .send()
            .await
            .map_err(gateway_unavailable)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::GatewayUnavailable(format!("revoke returned {}", resp.status())))
        }
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T> {
        let resp = self.http.post(self.url(path)).form(form).send().await.map_err(gateway_unavailable)?;
        parse_response(resp).await
    }
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if !resp.status().is_success() {
        return Err(Error::GatewayUnavailable(format!("gateway returned {}", resp.status())));
    }
    resp.json::<T>().await.map_err(gateway_unavailable)
}

fn gateway_unavailable(err: reqwest::Error) -> Error {
    Error::GatewayUnavailable(err.to_string())
}

fn url_encode_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn authorize_uri_encodes_query_parameters() {
        let client = GatewayClient::new(GatewayConfig {
            host: "https://gateway.example".into(),
            client_id: "client-1".into(),
            client_secret: "secret".into(),
            token_signing_key: "key".into(),
            issuing_redirect_uri: "https://app.example/issue/callback".into(),
            verification_redirect_uri: "https://app.example/verify/callback".into(),
        });
        let uri = client.authorize_uri(&[("scope", "openid Identity"), ("state", "abc")]);
        assert_eq!(uri, "https://gateway.example/oidc/authorize?scope=openid%20Identity&state=abc");
    }
}
