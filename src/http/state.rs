//! Application state (§4.11): the `Arc`-shared handle bundle axum's
//! extractors resolve `State<AppState>` against, wired once at startup in
//! [`crate::main`].

use std::sync::Arc;

use crate::cache::AnyCache;
use crate::config::Config;
use crate::events::publisher::AnyEventPublisher;
use crate::gateway::GatewayClient;
use crate::issuance::IssuanceService;
use crate::jwt::JwtDecoder;
use crate::revocation::RevocationService;
use crate::store::AnyMetadataStore;
use crate::verification::VerificationService;

/// Shared application state, cheap to `Clone` (everything inside is an
/// `Arc`, a connection pool handle, or a plain value).
#[derive(Clone)]
pub struct AppState {
    /// Static configuration loaded at startup.
    pub config: Arc<Config>,
    /// JWT decoder used directly by C4 (the services hold their own copy).
    pub jwt: JwtDecoder<AnyCache>,
    /// Metadata store, used directly by C3's freshness check.
    pub metadata_store: AnyMetadataStore,
    /// Identity verification flow (C5).
    pub verification: VerificationService<AnyCache>,
    /// Credential issuance flow (C6).
    pub issuance: IssuanceService<AnyCache, AnyMetadataStore>,
    /// Revocation, exposed for any direct/administrative trigger alongside
    /// the event-driven path in [`crate::events::listener::EventListener`].
    pub revocation: Arc<RevocationService<AnyMetadataStore, GatewayClient, AnyEventPublisher>>,
}
