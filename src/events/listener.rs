//! Event listener (C8, §4.8): long-polls the four record-update queues and
//! drives [`crate::revocation::RevocationService`] from their contents.
//! Failed processing leaves the message un-acknowledged so SQS redelivers it.

use aws_sdk_sqs::Client as SqsClient;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::events::fingerprint::{PlacementFields, ProgrammeFields, UpdateFields, content_hash};
use crate::gateway::GatewayClient;
use crate::model::CredentialType;
use crate::revocation::RevocationService;
use crate::store::MetadataStore;

use crate::events::publisher::EventPublisher;

/// A delete-event payload: `{tisId}` (§6).
#[derive(Deserialize)]
struct DeleteEvent {
    #[serde(rename = "tisId")]
    tis_id: String,
}

/// An update-event payload: `{tisId, data: <salient fields>}` (§6).
#[derive(Deserialize)]
struct UpdateEvent<T> {
    #[serde(rename = "tisId")]
    tis_id: String,
    data: T,
}

/// One of the four queues consumed by C8.
#[derive(Clone, Copy, Debug)]
pub enum Queue {
    /// Placement records deleted.
    DeletePlacement,
    /// Placement records updated.
    UpdatePlacement,
    /// Programme membership records deleted.
    DeleteProgrammeMembership,
    /// Programme membership records updated.
    UpdateProgrammeMembership,
}

impl Queue {
    const fn credential_type(self) -> CredentialType {
        match self {
            Self::DeletePlacement | Self::UpdatePlacement => CredentialType::Placement,
            Self::DeleteProgrammeMembership | Self::UpdateProgrammeMembership => {
                CredentialType::ProgrammeMembership
            }
        }
    }
}

/// Consumes SQS messages from the four record queues, computing a content
/// fingerprint for updates and deferring to [`RevocationService`] for the
/// actual gateway revocation and persistence.
pub struct EventListener<S, P> {
    sqs: SqsClient,
    revocation: RevocationService<S, GatewayClient, P>,
}

impl<S, P> EventListener<S, P>
where
    S: MetadataStore,
    P: EventPublisher,
{
    /// A listener over `sqs`, driving `revocation`.
    pub const fn new(sqs: SqsClient, revocation: RevocationService<S, GatewayClient, P>) -> Self {
        Self { sqs, revocation }
    }

    /// Long-poll `queue_url` for `queue` once, processing every message
    /// received. Returns the number of messages successfully processed.
    ///
    /// # Errors
    ///
    /// Returns an error only if the receive call itself fails; individual
    /// message-processing failures are logged and the message left
    /// un-acknowledged rather than propagated.
    pub async fn poll_once(&self, queue_url: &str, queue: Queue) -> crate::error::Result<usize> {
        let resp = self
            .sqs
            .receive_message()
            .queue_url(queue_url)
            .wait_time_seconds(20)
            .max_number_of_messages(10)
            .send()
            .await
            .map_err(|e| crate::error::Error::Internal(e.into()))?;

        let mut processed = 0;
        for message in resp.messages() {
            let Some(body) = message.body() else {
                warn!(?queue, "received message with no body, skipping");
                continue;
            };
            match self.handle_message(queue, body).await {
                Ok(()) => {
                    if let Some(receipt_handle) = message.receipt_handle() {
                        if let Err(err) = self
                            .sqs
                            .delete_message()
                            .queue_url(queue_url)
                            .receipt_handle(receipt_handle)
                            .send()
                            .await
                        {
                            warn!(?queue, error = %err, "failed to delete processed message");
                        }
                    }
                    processed += 1;
                }
                Err(err) => {
                    error!(?queue, error = %err, "failed to process event, leaving for redelivery");
                }
            }
        }
        Ok(processed)
    }

    async fn handle_message(&self, queue: Queue, body: &str) -> crate::error::Result<()> {
        let credential_type = queue.credential_type();
        match queue {
            Queue::DeletePlacement | Queue::DeleteProgrammeMembership => {
                let event: DeleteEvent =
                    serde_json::from_str(body).map_err(|e| crate::error::Error::Internal(e.into()))?;
                info!(tis_id = %event.tis_id, ?credential_type, "processing delete event");
                self.revocation.revoke(&event.tis_id, credential_type, None).await
            }
            Queue::UpdatePlacement => {
                let event: UpdateEvent<PlacementFields> =
                    serde_json::from_str(body).map_err(|e| crate::error::Error::Internal(e.into()))?;
                let hash = content_hash(&UpdateFields::Placement(event.data));
                info!(tis_id = %event.tis_id, ?credential_type, "processing update event");
                self.revocation.revoke(&event.tis_id, credential_type, Some(hash)).await
            }
            Queue::UpdateProgrammeMembership => {
                let event: UpdateEvent<ProgrammeFields> =
                    serde_json::from_str(body).map_err(|e| crate::error::Error::Internal(e.into()))?;
                let hash = content_hash(&UpdateFields::Programme(event.data));
                info!(tis_id = %event.tis_id, ?credential_type, "processing update event");
                self.revocation.revoke(&event.tis_id, credential_type, Some(hash)).await
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn queue_maps_to_expected_credential_type() {
        assert_eq!(Queue::DeletePlacement.credential_type(), CredentialType::Placement);
        assert_eq!(Queue::UpdatePlacement.credential_type(), CredentialType::Placement);
        assert_eq!(Queue::DeleteProgrammeMembership.credential_type(), CredentialType::ProgrammeMembership);
        assert_eq!(Queue::UpdateProgrammeMembership.credential_type(), CredentialType::ProgrammeMembership);
    }

    #[test]
    fn delete_event_deserialises_tis_id_only() {
        let event: DeleteEvent = serde_json::from_str(r#"{"tisId": "tis-1"}"#).expect("should parse");
        assert_eq!(event.tis_id, "tis-1");
    }
}
