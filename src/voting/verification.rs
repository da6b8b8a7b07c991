use std::sync::Arc;

use crate::biometric::{self, Verification};
use crate::error::{Error, Result};
use crate::logging::{log_entry, log_exit, OperationId};
use crate::store::BallotStore;

/// Checks palm scans against the templates stored for a voter.
pub struct ScanVerifier {
    store: Arc<dyn BallotStore>,
}

impl ScanVerifier {
    pub fn new(store: Arc<dyn BallotStore>) -> Self {
        Self { store }
    }

    /// Match a scan, sealed under the voter's key and base64-encoded, against
    /// that voter's templates.
    ///
    /// Only an unknown voter is an error. Every other failure, including a
    /// voter with no key, is reported as a rejected scan with score zero.
    pub async fn verify_scan(&self, voter_code: &str, scanned: &str) -> Result<Verification> {
        let id = OperationId::next();
        log_entry("verify", id, &format!("voter {voter_code}"));
        let result = self.verify_inner(voter_code, scanned).await;
        let summary = match &result {
            Ok(v) => format!("score {:.3} verified {}", v.score, v.verified),
            Err(_) => String::new(),
        };
        log_exit("verify", id, &result, &summary);
        result
    }

    async fn verify_inner(&self, voter_code: &str, scanned: &str) -> Result<Verification> {
        let voter = self
            .store
            .voter_by_code(voter_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {voter_code}")))?;
        if voter.encryption_key.is_none() {
            debug!("Voter {voter_code} has no key; rejecting scan");
            return Ok(Verification::rejected());
        }
        let score = biometric::score_base64(voter.templates(), scanned, voter.encryption_key.as_ref());
        Ok(Verification::from_score(score))
    }
}
