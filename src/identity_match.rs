//! Fuzzy identity matching (C5, §4.5): combines a phonetic (Double
//! Metaphone) and a textual (Levenshtein) similarity score per name field,
//! plus exact date-of-birth equality and presence of a unique identifier.

use rphonetic::{DoubleMetaphone, Encoder};
use uuid::Uuid;

use crate::model::IdentityData;

/// Verdict for a single name field (forename or surname).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NameVerdict {
    /// `1 - editDistance(dm(server), dm(best candidate)) / maxLen`.
    pub phonetic_accuracy: f64,
    /// `1 - editDistance(fold(server), fold(best candidate)) / maxLen`.
    pub text_accuracy: f64,
    /// Whether `text_accuracy` cleared the threshold implied by
    /// `phonetic_accuracy` (§4.5).
    pub valid: bool,
}

/// Overall result of matching server-held [`IdentityData`] against the
/// gateway-returned claims.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchResult {
    /// Verdict for the forename field.
    pub forename: NameVerdict,
    /// Verdict for the surname field.
    pub surname: NameVerdict,
    /// Whether date of birth matched exactly.
    pub date_of_birth_matches: bool,
    /// Whether a non-empty unique identifier was present.
    pub has_unique_identifier: bool,
}

impl MatchResult {
    /// Overall match iff both name verdicts are valid, date of birth
    /// matches, and a unique identifier was present (§4.5).
    #[must_use]
    pub const fn is_match(&self) -> bool {
        self.forename.valid && self.surname.valid && self.date_of_birth_matches && self.has_unique_identifier
    }
}

/// Claims returned by the gateway for an identity credential.
#[derive(Clone, Debug)]
pub struct IdentityClaims {
    /// Forename(s) as asserted by the credential.
    pub forenames: String,
    /// Surname as asserted by the credential.
    pub surname: String,
    /// Date of birth as asserted by the credential.
    pub date_of_birth: chrono::NaiveDate,
    /// The credential's unique identifier, if present.
    pub unique_identifier: Option<String>,
}

/// Match `server` (identity data held by this service) against `claims`
/// (returned by the gateway), per §4.5.
#[must_use]
pub fn match_identity(server: &IdentityData, claims: &IdentityClaims) -> MatchResult {
    MatchResult {
        forename: verify_name(&server.forenames, &claims.forenames),
        surname: verify_name(&server.surname, &claims.surname),
        date_of_birth_matches: server.date_of_birth == claims.date_of_birth,
        has_unique_identifier: claims
            .unique_identifier
            .as_deref()
            .is_some_and(|id| !id.is_empty() && Uuid::parse_str(id).is_ok()),
    }
}

/// Build the candidate set for `claim_value`: the whole value, plus each
/// `[- ]`-delimited token, in first-seen order with duplicates removed
/// (§4.5, scenario 3).
fn candidates(claim_value: &str) -> Vec<String> {
    let mut seen = Vec::new();
    let mut push_unique = |candidate: &str| {
        if !candidate.is_empty() && !seen.iter().any(|s: &String| s == candidate) {
            seen.push(candidate.to_string());
        }
    };
    push_unique(claim_value);
    for token in claim_value.split(['-', ' ']) {
        push_unique(token);
    }
    seen
}

/// Compare `server_value` against every candidate derived from
/// `claim_value`, selecting the candidate that maximises phonetic accuracy
/// then textual accuracy, per §4.5.
fn verify_name(server_value: &str, claim_value: &str) -> NameVerdict {
    let encoder = DoubleMetaphone::default();
    let server_dm = encoder.encode(server_value);
    let server_fold = server_value.to_lowercase();

    candidates(claim_value)
        .into_iter()
        .map(|candidate| {
            let candidate_dm = encoder.encode(&candidate);
            let phonetic_accuracy = similarity(&server_dm, &candidate_dm);
            let text_accuracy = similarity(&server_fold, &candidate.to_lowercase());
            let threshold = if phonetic_accuracy >= 1.0 { 0.5 } else { 0.8 };
            NameVerdict { phonetic_accuracy, text_accuracy, valid: text_accuracy >= threshold }
        })
        .max_by(|a, b| {
            a.phonetic_accuracy
                .total_cmp(&b.phonetic_accuracy)
                .then_with(|| a.text_accuracy.total_cmp(&b.text_accuracy))
        })
        .unwrap_or(NameVerdict { phonetic_accuracy: 0.0, text_accuracy: 0.0, valid: false })
}

/// `1 - levenshtein(a, b) / max(|a|, |b|)`, defined as `1.0` when both
/// strings are empty.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (strsim::levenshtein(a, b) as f64 / max_len as f64)
}
