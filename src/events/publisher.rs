//! Revocation event publisher (C9, §4.9): fans out credential revocation
//! notices to an SNS FIFO topic, one message per revoked credential, grouped
//! by `credential_id` so per-credential ordering is preserved.

use aws_sdk_sns::Client as SnsClient;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::CredentialType;

/// Body of a `CREDENTIAL_REVOKED` notification (§4.9, §6).
#[derive(Clone, Debug, Serialize)]
pub struct RevocationEvent {
    /// Surrogate id of the revoked credential.
    pub credential_id: Uuid,
    /// Record-of-record identifier the credential was about.
    pub tis_id: String,
    /// Which kind of credential was revoked.
    pub credential_type: CredentialType,
    /// Human-readable name of the credential type, for downstream
    /// consumers that render notifications (§4.9).
    pub credential_type_display: &'static str,
    /// Holder the revoked credential was issued to.
    pub trainee_id: String,
    /// When the credential was originally issued.
    pub issued_at: DateTime<Utc>,
    /// When the credential was revoked.
    pub revoked_at: DateTime<Utc>,
}

/// Publishes revocation events to SNS FIFO.
pub trait EventPublisher: Send + Sync {
    /// Publish a `CREDENTIAL_REVOKED` event for `event`.
    fn publish_revocation(&self, event: &RevocationEvent) -> impl Future<Output = Result<()>> + Send;
}

/// SNS-backed [`EventPublisher`].
#[derive(Clone)]
pub struct SnsEventPublisher {
    client: SnsClient,
    topic_arn: String,
}

impl SnsEventPublisher {
    /// A publisher for `topic_arn`, using `client`.
    #[must_use]
    pub const fn new(client: SnsClient, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }
}

impl EventPublisher for SnsEventPublisher {
    async fn publish_revocation(&self, event: &RevocationEvent) -> Result<()> {
        let body = serde_json::to_string(event).map_err(|e| Error::Internal(e.into()))?;
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(body)
            .message_group_id(event.credential_id.to_string())
            .message_attributes(
                "event_type",
                aws_sdk_sns::types::MessageAttributeValue::builder()
                    .data_type("String")
                    .string_value("CREDENTIAL_REVOKED")
                    .build()
                    .map_err(|e| Error::Internal(e.into()))?,
            )
            .send()
            .await
            .map_err(|e| Error::Internal(e.into()))?;
        Ok(())
    }
}

/// No-op [`EventPublisher`] for deployments/tests with events disabled.
#[derive(Clone, Copy, Default)]
pub struct NullEventPublisher;

impl EventPublisher for NullEventPublisher {
    async fn publish_revocation(&self, _event: &RevocationEvent) -> Result<()> {
        Ok(())
    }
}

/// Runtime choice of [`EventPublisher`], selected once at startup depending
/// on whether [`crate::config::EventsConfig::topic_arn`] is set.
#[derive(Clone)]
pub enum AnyEventPublisher {
    /// SNS FIFO topic.
    Sns(SnsEventPublisher),
    /// Events disabled.
    Null(NullEventPublisher),
}

impl EventPublisher for AnyEventPublisher {
    async fn publish_revocation(&self, event: &RevocationEvent) -> Result<()> {
        match self {
            Self::Sns(p) => p.publish_revocation(event).await,
            Self::Null(p) => p.publish_revocation(event).await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn null_publisher_accepts_every_event() {
        let publisher = NullEventPublisher;
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let event = RevocationEvent {
            credential_id: Uuid::new_v4(),
            tis_id: "tis-1".into(),
            credential_type: CredentialType::Placement,
            credential_type_display: CredentialType::Placement.display_name(),
            trainee_id: "trainee-1".into(),
            issued_at: now,
            revoked_at: now,
        };
        publisher.publish_revocation(&event).await.expect("null publisher never fails");
    }
}
