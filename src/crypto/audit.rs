use chrono::{DateTime, SecondsFormat, Utc};
use data_encoding::BASE64;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::SessionKey;
use crate::model::mongodb::Id;

pub type HmacSha256 = Hmac<Sha256>;

/// Separator between the fields of the canonical audit message.
const SEPARATOR: char = '|';

/// Canonical text form of a cast timestamp, as fed into the audit hash.
/// Ballot timestamps are truncated to microseconds when created, so this is lossless.
pub fn canonical_timestamp(cast_at: &DateTime<Utc>) -> String {
    cast_at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn canonical_message(
    ballot_id: &Id,
    voter_code: &str,
    candidate_id: &Id,
    cast_at: &DateTime<Utc>,
) -> String {
    format!(
        "{ballot_id}{SEPARATOR}{voter_code}{SEPARATOR}{candidate_id}{SEPARATOR}{}",
        canonical_timestamp(cast_at)
    )
}

/// Compute the audit hash for a ballot.
///
/// With a voter key this is HMAC-SHA256 keyed by that key; without one it
/// degrades to plain SHA-256 of the canonical message. Output is base64.
pub fn compute_hash(
    ballot_id: &Id,
    voter_code: &str,
    candidate_id: &Id,
    cast_at: &DateTime<Utc>,
    key: Option<&SessionKey>,
) -> String {
    let message = canonical_message(ballot_id, voter_code, candidate_id, cast_at);
    let digest = match key {
        Some(key) => {
            let mut hmac = HmacSha256::new_from_slice(key.as_bytes())
                .expect("HMAC can take key of any size");
            hmac.update(message.as_bytes());
            hmac.finalize().into_bytes().to_vec()
        }
        None => Sha256::digest(message.as_bytes()).to_vec(),
    };
    BASE64.encode(&digest)
}

/// Check a published audit hash against the ballot fields.
/// The keyed comparison runs in constant time.
pub fn verify_hash(
    ballot_id: &Id,
    voter_code: &str,
    candidate_id: &Id,
    cast_at: &DateTime<Utc>,
    key: Option<&SessionKey>,
    expected: &str,
) -> bool {
    let expected = match BASE64.decode(expected.trim().as_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let message = canonical_message(ballot_id, voter_code, candidate_id, cast_at);
    match key {
        Some(key) => {
            let mut hmac = HmacSha256::new_from_slice(key.as_bytes())
                .expect("HMAC can take key of any size");
            hmac.update(message.as_bytes());
            hmac.verify_slice(&expected).is_ok()
        }
        None => Sha256::digest(message.as_bytes()).as_slice() == expected.as_slice(),
    }
}
