//! Template matching: a cosine-similarity stand-in for real palm-vein
//! recognition, operating on the raw decrypted bytes.
//!
//! Every failure on this path (missing key, bad blob, wrong key, empty
//! template) collapses to a score of zero. Callers never learn why a match
//! failed, only that it did.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, Ciphertext, CryptoError, SessionKey};

/// Minimum score for a scan to be accepted.
pub const MATCH_THRESHOLD: f64 = 0.80;

/// The stored, encrypted templates a scan is compared against.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredTemplates<'a> {
    pub left: Option<&'a Ciphertext>,
    pub right: Option<&'a Ciphertext>,
}

/// The outcome of matching one scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub score: f64,
    pub verified: bool,
}

impl Verification {
    pub fn from_score(score: f64) -> Self {
        Self {
            score,
            verified: score >= MATCH_THRESHOLD,
        }
    }

    pub fn rejected() -> Self {
        Self::from_score(0.0)
    }
}

/// Cosine similarity of two byte vectors, each byte an unsigned magnitude.
///
/// Only the common prefix is compared. Empty or all-zero input scores zero,
/// and the result is clamped to `[0, 1]`.
pub fn cosine_similarity(a: &[u8], b: &[u8]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let (mut dot, mut mag_a, mut mag_b) = (0.0, 0.0, 0.0);
    for (&x, &y) in a[..len].iter().zip(&b[..len]) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    (dot / (mag_a.sqrt() * mag_b.sqrt())).clamp(0.0, 1.0)
}

fn try_score(
    stored: StoredTemplates<'_>,
    scanned: &Ciphertext,
    key: &SessionKey,
) -> Result<f64, CryptoError> {
    let scanned = crypto::decrypt(scanned, key)?;
    let mut best: f64 = 0.0;
    for template in [stored.left, stored.right].into_iter().flatten() {
        let template = crypto::decrypt(template, key)?;
        best = best.max(cosine_similarity(&template, &scanned));
    }
    Ok(best)
}

/// Score a scan against a voter's stored templates, using that voter's key.
///
/// Returns the best similarity across the present slots, or zero if there is
/// no key or any blob fails to decrypt.
pub fn score(stored: StoredTemplates<'_>, scanned: &Ciphertext, key: Option<&SessionKey>) -> f64 {
    let key = match key {
        Some(key) => key,
        None => {
            trace!("No template key bound, failing closed");
            return 0.0;
        }
    };
    match try_score(stored, scanned, key) {
        Ok(score) => score,
        Err(e) => {
            trace!("Template decryption failed, failing closed: {e}");
            0.0
        }
    }
}

/// As [`score`], with the scan still in its base64 wire format.
pub fn score_base64(stored: StoredTemplates<'_>, scanned: &str, key: Option<&SessionKey>) -> f64 {
    match Ciphertext::from_base64(scanned) {
        Ok(scanned) => score(stored, &scanned, key),
        Err(_) => 0.0,
    }
}

/// Apply the acceptance threshold to [`score`].
pub fn verify(stored: StoredTemplates<'_>, scanned: &Ciphertext, key: Option<&SessionKey>) -> bool {
    Verification::from_score(score(stored, scanned, key)).verified
}
