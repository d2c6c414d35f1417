//! JWT decoder (C2, §4.2): validates and parses gateway-issued JWTs against
//! a JWKS, memoising public keys by certificate thumbprint (`kid`) in the
//! shared cache (C1, partition [`CachePartition::JwksKeys`]).

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};

use crate::cache::{Cache, CachePartition};
use crate::error::{Error, Result};
use crate::gateway::GatewayClient;

/// A single JWK as published on the gateway's JWKS endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Jwk {
    /// Key id, used to select the key a given JWT was signed with.
    pub kid: String,
    /// Key type, e.g. `"RSA"` or `"EC"`.
    pub kty: String,
    /// Algorithm family, e.g. `"RS256"`.
    #[serde(default)]
    pub alg: Option<String>,
    /// RSA modulus, base64url, when `kty == "RSA"`.
    #[serde(default)]
    pub n: Option<String>,
    /// RSA public exponent, base64url, when `kty == "RSA"`.
    #[serde(default)]
    pub e: Option<String>,
    /// EC curve, when `kty == "EC"`.
    #[serde(default)]
    pub crv: Option<String>,
    /// EC x coordinate, base64url, when `kty == "EC"`.
    #[serde(default)]
    pub x: Option<String>,
    /// EC y coordinate, base64url, when `kty == "EC"`.
    #[serde(default)]
    pub y: Option<String>,
}

/// Response shape of the gateway's JWKS endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Jwks {
    /// The published keys.
    pub keys: Vec<Jwk>,
}

/// Decodes and validates gateway-issued JWTs, with JWKS key memoisation.
#[derive(Clone)]
pub struct JwtDecoder<C: Cache> {
    cache: C,
    gateway: GatewayClient,
    audience: Option<String>,
}

impl<C: Cache> JwtDecoder<C> {
    /// Build a decoder backed by `cache` for key memoisation and `gateway`
    /// for JWKS refresh.
    #[must_use]
    pub const fn new(cache: C, gateway: GatewayClient, audience: Option<String>) -> Self {
        Self { cache, gateway, audience }
    }

    /// Decode and verify `token`, returning its claims.
    ///
    /// Only asymmetric algorithm families (RS*/ES*) are accepted; the
    /// signing key is resolved from the token header's `kid`, first from
    /// the memoised cache, falling back to a synchronous JWKS fetch on
    /// miss. Any failure - malformed token, unknown `kid` after refresh,
    /// bad signature, expiry - surfaces as [`Error::InvalidToken`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToken`] for any validation failure.
    pub async fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T> {
        let header = decode_header(token).map_err(|_| Error::InvalidToken)?;
        let algorithm = header.alg;
        if !matches!(
            algorithm,
            Algorithm::RS256
                | Algorithm::RS384
                | Algorithm::RS512
                | Algorithm::ES256
                | Algorithm::ES384
                | Algorithm::PS256
                | Algorithm::PS384
                | Algorithm::PS512
        ) {
            return Err(Error::InvalidToken);
        }
        let kid = header.kid.ok_or(Error::InvalidToken)?;

        let jwk = match self.cache.peek::<Jwk>(CachePartition::JwksKeys, &kid).await {
            Ok(Some(jwk)) => jwk,
            _ => self.refresh_and_find(&kid).await?,
        };

        let key = decoding_key(&jwk)?;
        let mut validation = Validation::new(algorithm);
        if let Some(audience) = &self.audience {
            validation.set_audience(&[audience]);
        } else {
            validation.validate_aud = false;
        }

        let data = decode::<T>(token, &key, &validation).map_err(|_| Error::InvalidToken)?;
        Ok(data.claims)
    }

    /// Refresh the JWKS from the gateway and look up `kid`, memoising every
    /// returned key (TTL-less: read-keep, flushed on rotation or via
    /// [`Self::flush`]).
    async fn refresh_and_find(&self, kid: &str) -> Result<Jwk> {
        let jwks = self.gateway.fetch_jwks().await?;
        let mut found = None;
        for jwk in jwks.keys {
            if jwk.kid == kid {
                found = Some(jwk.clone());
            }
            // Cache every key, not just the one we need, to avoid refetching
            // the whole set key-by-key.
            let _ = self
                .cache
                .put_with_ttl(CachePartition::JwksKeys, &jwk.kid, &jwk, Duration::from_secs(u64::MAX / 2))
                .await;
        }
        found.ok_or(Error::InvalidToken)
    }

    /// Flush a single memoised key, e.g. in response to SIGHUP-driven key
    /// rotation (§9).
    pub async fn flush(&self, kid: &str) {
        let _ = self.cache.evict(CachePartition::JwksKeys, kid).await;
    }

    /// Flush every memoised JWKS key in one call. Used when SIGHUP signals a
    /// key rotation but doesn't name which `kid` rotated out; the next
    /// `decode` call simply refetches the whole set on its first miss.
    pub async fn flush_all(&self) {
        let _ = self.cache.evict_all(CachePartition::JwksKeys).await;
    }
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                return Err(Error::InvalidToken);
            };
            DecodingKey::from_rsa_components(n, e).map_err(|_| Error::InvalidToken)
        }
        "EC" => {
            let (Some(x), Some(y)) = (&jwk.x, &jwk.y) else {
                return Err(Error::InvalidToken);
            };
            DecodingKey::from_ec_components(x, y).map_err(|_| Error::InvalidToken)
        }
        _ => Err(Error::InvalidToken),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hs256_is_rejected_as_symmetric() {
        // The JWKS-backed decoder only trusts asymmetric families; a
        // symmetric `alg` would mean anyone holding the shared secret (i.e.
        // every client) could forge tokens.
        let disallowed = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        for alg in disallowed {
            assert!(!matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::ES256
                    | Algorithm::ES384
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ));
        }
    }
}
