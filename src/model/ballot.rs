use std::ops::{Deref, DerefMut};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::audit;
use crate::model::{candidate::Candidate, election::Election, mongodb::Id, voter::Voter};

/// Progress of the human-readable receipt for a ballot. The ballot itself is
/// valid whatever state this is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum ReceiptStatus {
    /// Not yet attempted.
    Pending,
    /// Rendered and stored at `path`.
    Generated { path: String },
    /// Rendering failed `attempts` times; may be retried.
    Failed { reason: String, attempts: u32 },
}

impl ReceiptStatus {
    /// How many rendering attempts have failed so far.
    pub fn failed_attempts(&self) -> u32 {
        match self {
            ReceiptStatus::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}

/// Core ballot data, as stored in the database.
///
/// At most one ballot exists per (voter, election) pair. Identity fields never
/// change after insertion; only `receipt` moves on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotCore {
    pub voter_id: Id,
    pub election_id: Id,
    pub candidate_id: Id,
    pub cast_at: DateTime<Utc>,
    pub audit_hash: String,
    pub receipt: ReceiptStatus,
}

/// A ballot from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub ballot: BallotCore,
}

impl Ballot {
    /// Create a ballot cast now, with its audit hash bound to the voter's key.
    pub fn new(voter: &Voter, election: &Election, candidate: &Candidate) -> Self {
        Self::new_at(voter, election, candidate, Utc::now())
    }

    /// Create a ballot cast at the given instant.
    pub fn new_at(
        voter: &Voter,
        election: &Election,
        candidate: &Candidate,
        cast_at: DateTime<Utc>,
    ) -> Self {
        let id = Id::new();
        // Keep the stored timestamp exactly representable in the audit message.
        let cast_at = cast_at.trunc_subsecs(6);
        let audit_hash = audit::compute_hash(
            &id,
            &voter.voter_code,
            &candidate.id,
            &cast_at,
            voter.encryption_key.as_ref(),
        );
        Self {
            id,
            ballot: BallotCore {
                voter_id: voter.id,
                election_id: election.id,
                candidate_id: candidate.id,
                cast_at,
                audit_hash,
                receipt: ReceiptStatus::Pending,
            },
        }
    }

    pub fn receipt_generated(&self) -> bool {
        matches!(self.receipt, ReceiptStatus::Generated { .. })
    }

    pub fn receipt_path(&self) -> Option<&str> {
        match &self.receipt {
            ReceiptStatus::Generated { path } => Some(path),
            _ => None,
        }
    }
}

impl Deref for Ballot {
    type Target = BallotCore;

    fn deref(&self) -> &Self::Target {
        &self.ballot
    }
}

impl DerefMut for Ballot {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ballot
    }
}
