//! Revocation service (C7, §4.7): retires every live credential for a
//! `(tisId, credentialType)` pair at the gateway, recording a content
//! fingerprint so replayed events are idempotent.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::publisher::{EventPublisher, RevocationEvent};
use crate::gateway::GatewayClient;
use crate::model::{CredentialType, RecordFingerprint};
use crate::store::MetadataStore;

/// Backoff schedule for gateway revoke calls (§4.7 step 4): 3 attempts,
/// 1 s / 3 s / 9 s.
fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default().with_min_delay(Duration::from_secs(1)).with_factor(3.0).with_max_times(3)
}

/// Retires every live credential for `(tis_id, credential_type)`.
pub struct RevocationService<S, G, P> {
    store: S,
    gateway: G,
    publisher: P,
}

impl<S, G, P> RevocationService<S, G, P>
where
    S: MetadataStore,
    G: RevokeAtGateway,
    P: EventPublisher,
{
    /// A revocation service over `store`, `gateway` and `publisher`.
    pub const fn new(store: S, gateway: G, publisher: P) -> Self {
        Self { store, gateway, publisher }
    }

    /// Revoke every live credential for `(tis_id, credential_type)`.
    ///
    /// `modified_hash` is `None` for a delete event and `Some(hash)` for an
    /// update event; a repeat call carrying the same hash as the stored
    /// fingerprint is a no-op (§4.7 step 3).
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata store itself is unreachable, or if
    /// the gateway revoke call exhausts its retries for any live credential
    /// - the credential is left `revocation-pending` and the caller (C8)
    /// must leave the triggering event un-acknowledged for redelivery.
    pub async fn revoke(
        &self, tis_id: &str, credential_type: CredentialType, modified_hash: Option<String>,
    ) -> Result<()> {
        let previous = self
            .store
            .put_fingerprint(RecordFingerprint {
                tis_id: tis_id.to_string(),
                credential_type,
                last_modified_content_hash: modified_hash.clone(),
                last_modified_at: Utc::now(),
            })
            .await?;

        if previous.as_ref().and_then(|p| p.last_modified_content_hash.as_ref()) == modified_hash.as_ref()
            && previous.is_some()
        {
            info!(tis_id, ?credential_type, "revocation replay with unchanged fingerprint, skipping");
            return Ok(());
        }

        let live = self.store.find_live(tis_id, credential_type).await?;
        let mut pending = false;
        for credential in live {
            let credential_id = credential.credential_id.to_string();
            let outcome = (|| async { self.gateway.revoke(&credential_id).await })
                .retry(backoff())
                .when(Error::is_retryable)
                .await;

            match outcome {
                Ok(()) => {
                    let revoked_at = Utc::now();
                    if self.store.mark_revoked(credential.credential_id, revoked_at).await? {
                        self.publisher
                            .publish_revocation(&RevocationEvent {
                                credential_id: credential.credential_id,
                                tis_id: tis_id.to_string(),
                                credential_type,
                                credential_type_display: credential_type.display_name(),
                                trainee_id: credential.trainee_id.clone(),
                                issued_at: credential.issued_at,
                                revoked_at,
                            })
                            .await?;
                        info!(credential_id = %credential.credential_id, "credential revoked");
                    }
                }
                Err(err) => {
                    warn!(credential_id = %credential.credential_id, error = %err, "gateway revoke exhausted retries");
                    self.store.mark_revocation_pending(credential.credential_id).await?;
                    pending = true;
                }
            }
        }
        if pending {
            return Err(Error::RevocationPending);
        }
        Ok(())
    }
}

/// The single gateway operation [`RevocationService`] needs, split out so
/// tests can stub it without a full [`GatewayClient`].
pub trait RevokeAtGateway: Send + Sync {
    /// Revoke `credential_id` at the gateway.
    fn revoke(&self, credential_id: &str) -> impl Future<Output = Result<()>> + Send;
}

impl RevokeAtGateway for GatewayClient {
    async fn revoke(&self, credential_id: &str) -> Result<()> {
        Self::revoke(self, credential_id).await
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use uuid::Uuid;

    use super::*;
    use crate::events::publisher::NullEventPublisher;
    use crate::model::CredentialMetadata;
    use crate::store::InMemoryMetadataStore;

    #[derive(Clone, Default)]
    struct CountingGateway {
        calls: Arc<AtomicUsize>,
        fail_times: usize,
    }

    impl RevokeAtGateway for CountingGateway {
        async fn revoke(&self, _credential_id: &str) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(Error::GatewayUnavailable("simulated".into()));
            }
            Ok(())
        }
    }

    async fn seeded_store(tis_id: &str) -> InMemoryMetadataStore {
        let store = InMemoryMetadataStore::new();
        store
            .insert_credential(CredentialMetadata {
                credential_id: Uuid::new_v4(),
                credential_type: CredentialType::Placement,
                tis_id: tis_id.into(),
                trainee_id: "trainee-1".into(),
                issued_at: Utc::now(),
                expires_at: Utc::now(),
                revoked_at: None,
                revocation_pending: false,
            })
            .await
            .expect("should insert");
        store
    }

    #[tokio::test]
    async fn revoke_marks_live_credentials_revoked() {
        let store = seeded_store("tis-1").await;
        let gateway = CountingGateway::default();
        let service = RevocationService::new(store.clone(), gateway, NullEventPublisher);

        service.revoke("tis-1", CredentialType::Placement, None).await.expect("should revoke");

        let live = store.find_live("tis-1", CredentialType::Placement).await.expect("should query");
        assert!(live.is_empty(), "all credentials should now be revoked");
    }

    #[tokio::test]
    async fn repeat_call_with_same_hash_is_a_no_op() {
        let store = seeded_store("tis-2").await;
        let gateway = CountingGateway::default();
        let service = RevocationService::new(store.clone(), gateway.clone(), NullEventPublisher);

        service.revoke("tis-2", CredentialType::Placement, Some("hash-a".into())).await.expect("should revoke");
        let calls_after_first = gateway.calls.load(Ordering::SeqCst);

        service.revoke("tis-2", CredentialType::Placement, Some("hash-a".into())).await.expect("should no-op");
        assert_eq!(
            gateway.calls.load(Ordering::SeqCst),
            calls_after_first,
            "replay with identical hash must not call the gateway again"
        );
    }

    #[tokio::test]
    async fn exhausted_retries_mark_revocation_pending_and_surface_as_error() {
        let store = seeded_store("tis-3").await;
        let gateway = CountingGateway { calls: Arc::new(AtomicUsize::new(0)), fail_times: 10 };
        let service = RevocationService::new(store.clone(), gateway, NullEventPublisher);

        let err = service.revoke("tis-3", CredentialType::Placement, None).await.expect_err("should surface as pending");
        assert!(matches!(err, Error::RevocationPending));

        let live = store.find_live("tis-3", CredentialType::Placement).await.expect("should query");
        assert_eq!(live.len(), 1, "credential stays live while revocation is pending");
    }
}
