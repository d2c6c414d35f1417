//! Credential metadata store (C10, §4.10) and the `RecordFingerprint`
//! ledger it shares a backend with. Document-store-backed per §4.10;
//! concretely MongoDB in deployment, an in-memory store for tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::TryStreamExt;
use mongodb::bson::{Bson, doc, to_bson};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, IndexModel};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{CredentialMetadata, CredentialType, RecordFingerprint};

/// Durable ledger of issued credentials and record fingerprints.
///
/// Implementors must serialise metadata writes by `credential_id` and
/// perform revocation updates as a compare-and-set on `revoked_at == null`
/// (§5 Shared resources).
pub trait MetadataStore: Send + Sync {
    /// Persist a newly issued credential.
    fn insert_credential(&self, metadata: CredentialMetadata) -> impl Future<Output = Result<()>> + Send;

    /// All currently non-revoked credentials for `(tis_id, credential_type)`.
    fn find_live(
        &self, tis_id: &str, credential_type: CredentialType,
    ) -> impl Future<Output = Result<Vec<CredentialMetadata>>> + Send;

    /// Compare-and-set: set `revoked_at` on `credential_id` iff it is
    /// currently unset. Returns `true` iff this call performed the update
    /// (idempotent: a second call for an already-revoked credential is a
    /// no-op returning `false`).
    fn mark_revoked(
        &self, credential_id: Uuid, revoked_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Mark a credential as having exhausted its revoke retries, so it can
    /// be swept later (§4.7 step 4).
    fn mark_revocation_pending(&self, credential_id: Uuid) -> impl Future<Output = Result<()>> + Send;

    /// Read the last-recorded fingerprint for `(tis_id, credential_type)`.
    fn get_fingerprint(
        &self, tis_id: &str, credential_type: CredentialType,
    ) -> impl Future<Output = Result<Option<RecordFingerprint>>> + Send;

    /// Upsert the fingerprint for `(tis_id, credential_type)`. Returns the
    /// fingerprint that was in place immediately before this write, so
    /// [`crate::revocation::RevocationService`] can detect a no-op replay.
    fn put_fingerprint(
        &self, fingerprint: RecordFingerprint,
    ) -> impl Future<Output = Result<Option<RecordFingerprint>>> + Send;
}

/// `getLastModifiedDate` (§4.7), consumed by the signed-data filter (C3).
pub async fn last_modified_date(
    store: &impl MetadataStore, tis_id: &str, credential_type: CredentialType,
) -> Result<Option<DateTime<Utc>>> {
    Ok(store.get_fingerprint(tis_id, credential_type).await?.map(|f| f.last_modified_at))
}

fn fingerprint_key(tis_id: &str, credential_type: CredentialType) -> String {
    format!("{tis_id}:{credential_type:?}")
}

/// MongoDB-backed [`MetadataStore`].
#[derive(Clone)]
pub struct MongoMetadataStore {
    credentials: Collection<CredentialMetadata>,
    fingerprints: Collection<RecordFingerprint>,
}

impl MongoMetadataStore {
    /// Connect to `database` within `client`, ensuring the required
    /// indexes of §4.10 exist.
    ///
    /// # Errors
    ///
    /// Returns an error if index creation fails.
    pub async fn new(database: &mongodb::Database) -> Result<Self> {
        let credentials = database.collection::<CredentialMetadata>("CredentialMetadata");
        let fingerprints = database.collection::<RecordFingerprint>("RecordFingerprint");

        credentials
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "tis_id": 1, "credential_type": 1, "revoked_at": 1 })
                    .build(),
            )
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        credentials
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "credential_id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        fingerprints
            .create_index(IndexModel::builder().keys(doc! { "tis_id": 1, "credential_type": 1 }).build())
            .await
            .map_err(|e| Error::Internal(e.into()))?;

        Ok(Self { credentials, fingerprints })
    }
}

impl MetadataStore for MongoMetadataStore {
    async fn insert_credential(&self, metadata: CredentialMetadata) -> Result<()> {
        self.credentials.insert_one(metadata).await.map_err(|e| Error::Internal(e.into()))?;
        Ok(())
    }

    async fn find_live(&self, tis_id: &str, credential_type: CredentialType) -> Result<Vec<CredentialMetadata>> {
        let filter = doc! {
            "tis_id": tis_id,
            "credential_type": to_bson(&credential_type).map_err(|e| Error::Internal(e.into()))?,
            "revoked_at": Bson::Null,
        };
        let mut cursor = self.credentials.find(filter).await.map_err(|e| Error::Internal(e.into()))?;
        let mut out = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(|e| Error::Internal(e.into()))? {
            out.push(doc);
        }
        Ok(out)
    }

    async fn mark_revoked(&self, credential_id: Uuid, revoked_at: DateTime<Utc>) -> Result<bool> {
        let filter = doc! { "credential_id": credential_id.to_string(), "revoked_at": Bson::Null };
        let update = doc! { "$set": { "revoked_at": to_bson(&revoked_at).map_err(|e| Error::Internal(e.into()))?, "revocation_pending": false } };
        let options = FindOneAndUpdateOptions::builder().return_document(ReturnDocument::After).build();
        let updated = self
            .credentials
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        Ok(updated.is_some())
    }

    async fn mark_revocation_pending(&self, credential_id: Uuid) -> Result<()> {
        let filter = doc! { "credential_id": credential_id.to_string() };
        let update = doc! { "$set": { "revocation_pending": true } };
        self.credentials.update_one(filter, update).await.map_err(|e| Error::Internal(e.into()))?;
        Ok(())
    }

    async fn get_fingerprint(
        &self, tis_id: &str, credential_type: CredentialType,
    ) -> Result<Option<RecordFingerprint>> {
        let filter = doc! {
            "tis_id": tis_id,
            "credential_type": to_bson(&credential_type).map_err(|e| Error::Internal(e.into()))?,
        };
        self.fingerprints.find_one(filter).await.map_err(|e| Error::Internal(e.into()))
    }

    async fn put_fingerprint(&self, fingerprint: RecordFingerprint) -> Result<Option<RecordFingerprint>> {
        let previous = self.get_fingerprint(&fingerprint.tis_id, fingerprint.credential_type).await?;
        let filter = doc! {
            "tis_id": &fingerprint.tis_id,
            "credential_type": to_bson(&fingerprint.credential_type).map_err(|e| Error::Internal(e.into()))?,
        };
        let update = doc! { "$set": to_bson(&fingerprint).map_err(|e| Error::Internal(e.into()))? };
        let options = mongodb::options::UpdateOptions::builder().upsert(true).build();
        self.fingerprints
            .update_one(filter, update)
            .with_options(options)
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        Ok(previous)
    }
}

/// In-memory [`MetadataStore`] for tests.
#[derive(Clone, Default)]
pub struct InMemoryMetadataStore {
    credentials: Arc<DashMap<Uuid, CredentialMetadata>>,
    fingerprints: Arc<DashMap<String, RecordFingerprint>>,
}

impl InMemoryMetadataStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    async fn insert_credential(&self, metadata: CredentialMetadata) -> Result<()> {
        self.credentials.insert(metadata.credential_id, metadata);
        Ok(())
    }

    async fn find_live(&self, tis_id: &str, credential_type: CredentialType) -> Result<Vec<CredentialMetadata>> {
        Ok(self
            .credentials
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|m| m.tis_id == tis_id && m.credential_type == credential_type && m.is_live())
            .collect())
    }

    async fn mark_revoked(&self, credential_id: Uuid, revoked_at: DateTime<Utc>) -> Result<bool> {
        let Some(mut entry) = self.credentials.get_mut(&credential_id) else {
            return Ok(false);
        };
        if entry.revoked_at.is_some() {
            return Ok(false);
        }
        entry.revoked_at = Some(revoked_at);
        entry.revocation_pending = false;
        Ok(true)
    }

    async fn mark_revocation_pending(&self, credential_id: Uuid) -> Result<()> {
        if let Some(mut entry) = self.credentials.get_mut(&credential_id) {
            entry.revocation_pending = true;
        }
        Ok(())
    }

    async fn get_fingerprint(
        &self, tis_id: &str, credential_type: CredentialType,
    ) -> Result<Option<RecordFingerprint>> {
        Ok(self.fingerprints.get(&fingerprint_key(tis_id, credential_type)).map(|e| e.value().clone()))
    }

    async fn put_fingerprint(&self, fingerprint: RecordFingerprint) -> Result<Option<RecordFingerprint>> {
        let key = fingerprint_key(&fingerprint.tis_id, fingerprint.credential_type);
        Ok(self.fingerprints.insert(key, fingerprint))
    }
}

/// Runtime choice of [`MetadataStore`] backend, selected once at startup.
/// Lets [`crate::http::state::AppState`] hold a single concrete, `Clone`
/// type regardless of backend, for the same reason as [`crate::cache::AnyCache`].
#[derive(Clone)]
pub enum AnyMetadataStore {
    /// Deployment backend.
    Mongo(MongoMetadataStore),
    /// Test/local-development backend.
    Memory(InMemoryMetadataStore),
}

impl MetadataStore for AnyMetadataStore {
    async fn insert_credential(&self, metadata: CredentialMetadata) -> Result<()> {
        match self {
            Self::Mongo(s) => s.insert_credential(metadata).await,
            Self::Memory(s) => s.insert_credential(metadata).await,
        }
    }

    async fn find_live(&self, tis_id: &str, credential_type: CredentialType) -> Result<Vec<CredentialMetadata>> {
        match self {
            Self::Mongo(s) => s.find_live(tis_id, credential_type).await,
            Self::Memory(s) => s.find_live(tis_id, credential_type).await,
        }
    }

    async fn mark_revoked(&self, credential_id: Uuid, revoked_at: DateTime<Utc>) -> Result<bool> {
        match self {
            Self::Mongo(s) => s.mark_revoked(credential_id, revoked_at).await,
            Self::Memory(s) => s.mark_revoked(credential_id, revoked_at).await,
        }
    }

    async fn mark_revocation_pending(&self, credential_id: Uuid) -> Result<()> {
        match self {
            Self::Mongo(s) => s.mark_revocation_pending(credential_id).await,
            Self::Memory(s) => s.mark_revocation_pending(credential_id).await,
        }
    }

    async fn get_fingerprint(
        &self, tis_id: &str, credential_type: CredentialType,
    ) -> Result<Option<RecordFingerprint>> {
        match self {
            Self::Mongo(s) => s.get_fingerprint(tis_id, credential_type).await,
            Self::Memory(s) => s.get_fingerprint(tis_id, credential_type).await,
        }
    }

    async fn put_fingerprint(&self, fingerprint: RecordFingerprint) -> Result<Option<RecordFingerprint>> {
        match self {
            Self::Mongo(s) => s.put_fingerprint(fingerprint).await,
            Self::Memory(s) => s.put_fingerprint(fingerprint).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_metadata(credential_id: Uuid, tis_id: &str) -> CredentialMetadata {
        CredentialMetadata {
            credential_id,
            credential_type: CredentialType::Placement,
            tis_id: tis_id.into(),
            trainee_id: "trainee-1".into(),
            issued_at: Utc::now(),
            expires_at: Utc::now(),
            revoked_at: None,
            revocation_pending: false,
        }
    }

    #[tokio::test]
    async fn find_live_excludes_revoked() {
        let store = InMemoryMetadataStore::new();
        let live_id = Uuid::new_v4();
        let revoked_id = Uuid::new_v4();
        store.insert_credential(sample_metadata(live_id, "tis-1")).await.expect("should insert");
        let mut revoked = sample_metadata(revoked_id, "tis-1");
        revoked.revoked_at = Some(Utc::now());
        store.insert_credential(revoked).await.expect("should insert");

        let live = store.find_live("tis-1", CredentialType::Placement).await.expect("should query");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].credential_id, live_id);
    }

    #[tokio::test]
    async fn mark_revoked_is_idempotent() {
        let store = InMemoryMetadataStore::new();
        let id = Uuid::new_v4();
        store.insert_credential(sample_metadata(id, "tis-1")).await.expect("should insert");

        let first = store.mark_revoked(id, Utc::now()).await.expect("should update");
        let second = store.mark_revoked(id, Utc::now()).await.expect("should update");
        assert!(first);
        assert!(!second, "second revoke of the same credential must be a no-op");
    }

    #[tokio::test]
    async fn put_fingerprint_returns_previous_value() {
        let store = InMemoryMetadataStore::new();
        let first = RecordFingerprint {
            tis_id: "tis-1".into(),
            credential_type: CredentialType::Placement,
            last_modified_content_hash: Some("hash-a".into()),
            last_modified_at: Utc::now(),
        };
        let previous = store.put_fingerprint(first.clone()).await.expect("should upsert");
        assert!(previous.is_none());

        let second = RecordFingerprint { last_modified_content_hash: Some("hash-b".into()), ..first.clone() };
        let previous = store.put_fingerprint(second).await.expect("should upsert");
        assert_eq!(previous.map(|p| p.last_modified_content_hash), Some(Some("hash-a".into())));
    }
}
