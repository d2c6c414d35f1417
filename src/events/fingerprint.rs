//! MD5 content fingerprint for record-update events (§4.8, §6, §9 open
//! question (b)): salient fields, in the declared order, UTF-8 encoded and
//! `,`-joined before hashing.

use md5::{Digest, Md5};
use serde::Deserialize;

use crate::model::CredentialType;

/// Salient fields of an updated placement record, in the order hashed
/// (§6).
#[derive(Clone, Debug, Deserialize)]
pub struct PlacementFields {
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
    /// Placement start date, as received (opaque string - this service only
    /// hashes it, it never parses it).
    pub start_date: String,
    /// Placement end date, as received.
    pub end_date: String,
}

impl PlacementFields {
    fn ordered(&self) -> [&str; 7] {
        [
            &self.specialty,
            &self.grade,
            &self.national_post_number,
            &self.employing_body,
            &self.site,
            &self.start_date,
            &self.end_date,
        ]
    }
}

/// Salient fields of an updated programme membership record, in the order
/// hashed (§6).
#[derive(Clone, Debug, Deserialize)]
pub struct ProgrammeFields {
    /// Name of the training programme.
    pub programme_name: String,
    /// Programme start date, as received.
    pub programme_start_date: String,
    /// Programme end date, as received.
    pub programme_end_date: String,
}

impl ProgrammeFields {
    fn ordered(&self) -> [&str; 3] {
        [&self.programme_name, &self.programme_start_date, &self.programme_end_date]
    }
}

/// The salient-field payload of an update event, tagged by credential type
/// so one listener can dispatch both queues.
#[derive(Clone, Debug)]
pub enum UpdateFields {
    /// Placement update.
    Placement(PlacementFields),
    /// Programme membership update.
    Programme(ProgrammeFields),
}

impl UpdateFields {
    /// Which credential type this update concerns.
    #[must_use]
    pub const fn credential_type(&self) -> CredentialType {
        match self {
            Self::Placement(_) => CredentialType::Placement,
            Self::Programme(_) => CredentialType::ProgrammeMembership,
        }
    }

    fn joined(&self) -> String {
        match self {
            Self::Placement(fields) => fields.ordered().join(","),
            Self::Programme(fields) => fields.ordered().join(","),
        }
    }
}

/// `MD5(concat(orderedSalientFields))`, hex-encoded, over the UTF-8 bytes
/// of the comma-joined fields (§4.8, §9 open question (b)).
#[must_use]
pub fn content_hash(fields: &UpdateFields) -> String {
    let mut hasher = Md5::new();
    hasher.update(fields.joined().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn placement_hash_is_stable_for_identical_input() {
        let fields = UpdateFields::Placement(PlacementFields {
            specialty: "Cardiology".into(),
            grade: "ST3".into(),
            national_post_number: "NPN1".into(),
            employing_body: "NHS Trust".into(),
            site: "Main Site".into(),
            start_date: "2026-01-01".into(),
            end_date: "2026-12-31".into(),
        });
        let first = content_hash(&fields);
        let second = content_hash(&fields);
        assert_eq!(first, second);
        assert_eq!(first.len(), 32, "hex-encoded MD5 digest is 32 characters");
    }

    #[test]
    fn different_field_order_produces_different_hash() {
        // Guards against accidentally hashing a re-ordered/unordered
        // serialisation of the same fields (§9 open question (b)).
        let a = "Cardiology,ST3".to_string();
        let b = "ST3,Cardiology".to_string();
        let mut ha = Md5::new();
        ha.update(a.as_bytes());
        let mut hb = Md5::new();
        hb.update(b.as_bytes());
        assert_ne!(ha.finalize(), hb.finalize());
    }

    #[test]
    fn programme_hash_reflects_all_three_fields() {
        let base = ProgrammeFields {
            programme_name: "Core Medical Training".into(),
            programme_start_date: "2026-08-01".into(),
            programme_end_date: "2028-07-31".into(),
        };
        let changed = ProgrammeFields { programme_name: "Different Programme".into(), ..base.clone() };
        assert_ne!(
            content_hash(&UpdateFields::Programme(base)),
            content_hash(&UpdateFields::Programme(changed))
        );
    }
}
