//! Data model (§3): the cached and durable entities the broker core moves
//! between the cache, the gateway and the metadata store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity data supplied by the holder at the start of a verification flow.
/// Cached under `nonce`, TTL `verification-request`, evicted on first read.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct IdentityData {
    /// Given name(s) as held by the service.
    pub forenames: String,
    /// Surname as held by the service.
    pub surname: String,
    /// Date of birth as held by the service.
    pub date_of_birth: NaiveDate,
}

/// The credential type a [`CredentialPayload`] mints.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialType {
    /// A single training placement.
    Placement,
    /// Membership of a training programme.
    ProgrammeMembership,
}

impl CredentialType {
    /// The issuance scope suffix used when building the PAR request
    /// (`issue.<Type>`), per §4.6.
    #[must_use]
    pub const fn issuance_scope_suffix(self) -> &'static str {
        match self {
            Self::Placement => "Placement",
            Self::ProgrammeMembership => "ProgrammeMembership",
        }
    }

    /// Display name used in revocation events (§4.9).
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Placement => "Training Placement",
            Self::ProgrammeMembership => "Training Programme Membership",
        }
    }
}

/// Common interface shared by the two credential payload variants, per
/// SPEC_FULL §9 ("tagged enum with a common interface, no inheritance").
pub trait CredentialContent {
    /// The record-of-record identifier this credential is about.
    fn tis_id(&self) -> &str;
    /// Which of the two supported credential types this is.
    fn credential_type(&self) -> CredentialType;
    /// End-of-day UTC instant derived from the record's domain end date,
    /// used as the credential's expiry.
    fn expires_at(&self) -> DateTime<Utc>;
}

/// A training placement, as submitted for issuance.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PlacementPayload {
    /// Record-of-record identifier.
    pub tis_id: String,
    /// Specialty of the placement.
    pub specialty: String,
    /// Grade of the trainee during the placement.
    pub grade: String,
    /// National Post Number for the placement.
    pub national_post_number: String,
    /// Employing body for the placement.
    pub employing_body: String,
    /// Site at which the placement takes place.
    pub site: String,
    /// Placement start date.
    pub start_date: NaiveDate,
    /// Placement end date.
    pub end_date: NaiveDate,
}

impl CredentialContent for PlacementPayload {
    fn tis_id(&self) -> &str {
        &self.tis_id
    }

    fn credential_type(&self) -> CredentialType {
        CredentialType::Placement
    }

    fn expires_at(&self) -> DateTime<Utc> {
        end_of_day_utc(self.end_date)
    }
}

/// Membership of a training programme, as submitted for issuance.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProgrammeMembershipPayload {
    /// Record-of-record identifier.
    pub tis_id: String,
    /// Name of the training programme.
    pub programme_name: String,
    /// Programme start date.
    pub programme_start_date: NaiveDate,
    /// Programme end date.
    pub programme_end_date: NaiveDate,
}

impl CredentialContent for ProgrammeMembershipPayload {
    fn tis_id(&self) -> &str {
        &self.tis_id
    }

    fn credential_type(&self) -> CredentialType {
        CredentialType::ProgrammeMembership
    }

    fn expires_at(&self) -> DateTime<Utc> {
        end_of_day_utc(self.programme_end_date)
    }
}

fn end_of_day_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59).unwrap_or_else(|| date.and_hms_opt(0, 0, 0).expect("midnight is valid")).and_utc()
}

/// The data submitted by the client to be minted into a credential (§3).
/// Cached under `state`, evicted on read, for the duration of the issuance
/// flow.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "credentialType", rename_all = "kebab-case")]
pub enum CredentialPayload {
    /// A training placement credential request.
    Placement(PlacementPayload),
    /// A training programme membership credential request.
    ProgrammeMembership(ProgrammeMembershipPayload),
}

impl CredentialPayload {
    /// Dispatch to the variant's [`CredentialContent`] implementation.
    #[must_use]
    pub fn content(&self) -> &dyn CredentialContent {
        match self {
            Self::Placement(p) => p,
            Self::ProgrammeMembership(p) => p,
        }
    }
}

/// Durable record of an issued credential (§3). Written on successful
/// issuance callback; `revoked_at` is set by the revocation service.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CredentialMetadata {
    /// Surrogate id, unique across all issued credentials.
    pub credential_id: Uuid,
    /// Which kind of credential this is.
    pub credential_type: CredentialType,
    /// Record-of-record identifier the credential is about.
    pub tis_id: String,
    /// The trainee the credential was issued to.
    pub trainee_id: String,
    /// When the gateway reported the credential was issued.
    pub issued_at: DateTime<Utc>,
    /// When the credential expires.
    pub expires_at: DateTime<Utc>,
    /// When this credential was revoked, if it has been.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Set when a revoke attempt against the gateway has exhausted its
    /// retries; cleared once a subsequent attempt succeeds.
    #[serde(default)]
    pub revocation_pending: bool,
}

impl CredentialMetadata {
    /// A credential is live (not yet revoked) iff `revoked_at` is unset.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// Durable fingerprint of the last-seen state of a domain record (§3), read
/// by the signed-data filter (C3) and written by the revocation service
/// (C7) and the event listener (C8).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RecordFingerprint {
    /// Record-of-record identifier.
    pub tis_id: String,
    /// Which kind of record this fingerprint describes.
    pub credential_type: CredentialType,
    /// Content hash of the record at `last_modified_at`, or `None` when the
    /// change was a delete rather than an update.
    pub last_modified_content_hash: Option<String>,
    /// When this fingerprint was last updated.
    pub last_modified_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn end_of_day_is_last_second() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 31).expect("valid date");
        let instant = end_of_day_utc(date);
        assert_eq!(instant.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn credential_payload_dispatches_to_variant() {
        let payload = CredentialPayload::Placement(PlacementPayload {
            tis_id: "tis-1".into(),
            specialty: "Cardiology".into(),
            grade: "ST3".into(),
            national_post_number: "NPN1".into(),
            employing_body: "NHS Trust".into(),
            site: "Main Site".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31).expect("valid date"),
        });
        assert_eq!(payload.content().tis_id(), "tis-1");
        assert_eq!(payload.content().credential_type(), CredentialType::Placement);
    }

    #[test]
    fn credential_metadata_is_live_until_revoked() {
        let mut metadata = CredentialMetadata {
            credential_id: Uuid::nil(),
            credential_type: CredentialType::Placement,
            tis_id: "tis-1".into(),
            trainee_id: "trainee-1".into(),
            issued_at: Utc::now(),
            expires_at: Utc::now(),
            revoked_at: None,
            revocation_pending: false,
        };
        assert!(metadata.is_live());
        metadata.revoked_at = Some(Utc::now());
        assert!(!metadata.is_live());
    }
}
