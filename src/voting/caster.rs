use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::receipt::{ReceiptDocument, ReceiptRenderer};
use crate::error::{Error, Result};
use crate::logging::{log_entry, log_exit, OperationId};
use crate::model::{
    ballot::{Ballot, ReceiptStatus},
    candidate::Candidate,
    election::Election,
    mongodb::Id,
    voter::Voter,
};
use crate::store::{BallotStore, CastOutcome};

/// Ballot and tally counts for one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyReport {
    pub election_id: Id,
    /// Number of ballots referencing the election.
    pub ballots: u64,
    /// Sum of the candidates' vote counts.
    pub votes: u64,
    pub per_candidate: BTreeMap<Id, u64>,
}

impl TallyReport {
    /// Does every ballot correspond to exactly one counted vote?
    pub fn is_consistent(&self) -> bool {
        self.ballots == self.votes
    }
}

/// Casts ballots: eligibility checks, the single atomic commit, and the
/// receipt that follows it.
pub struct BallotCaster {
    store: Arc<dyn BallotStore>,
    renderer: Arc<dyn ReceiptRenderer>,
}

impl BallotCaster {
    pub fn new(store: Arc<dyn BallotStore>, renderer: Arc<dyn ReceiptRenderer>) -> Self {
        Self { store, renderer }
    }

    pub fn store(&self) -> &Arc<dyn BallotStore> {
        &self.store
    }

    /// Cast a vote for `candidate_id` in `election_id` on behalf of the voter
    /// with the given code.
    ///
    /// Once this returns `Ok` the vote is committed, whatever happened to the
    /// receipt; check [`Ballot::receipt`] for that.
    pub async fn cast_vote(
        &self,
        voter_code: &str,
        election_id: Id,
        candidate_id: Id,
    ) -> Result<Ballot> {
        let id = OperationId::next();
        log_entry(
            "cast",
            id,
            &format!("voter {voter_code} election {election_id}"),
        );
        let result = self.cast(voter_code, election_id, candidate_id).await;
        let summary = match &result {
            Ok(ballot) => format!("ballot {} receipt {:?}", ballot.id, ballot.receipt),
            Err(_) => String::new(),
        };
        log_exit("cast", id, &result, &summary);
        result
    }

    async fn cast(&self, voter_code: &str, election_id: Id, candidate_id: Id) -> Result<Ballot> {
        // Resolve everything the ballot refers to.
        let voter = self
            .store
            .voter_by_code(voter_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {voter_code}")))?;
        let election = self
            .store
            .election_by_id(election_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("election {election_id}")))?;
        let candidate = self
            .store
            .candidate_by_id(candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {candidate_id}")))?;

        // Eligibility.
        if candidate.election_id != election.id {
            return Err(Error::CandidateMismatch {
                candidate: candidate.id,
                election: election.id,
            });
        }
        if !election.is_open_at(Utc::now()) {
            return Err(Error::ElectionClosed(election.id));
        }
        let already_voted = Error::AlreadyVoted {
            voter: voter.id,
            election: election.id,
        };
        if self.store.ballot_exists(voter.id, election.id).await? {
            return Err(already_voted);
        }

        // Commit. The store decides the race if another cast slipped in
        // since the check above.
        let mut ballot = Ballot::new(&voter, &election, &candidate);
        match self.store.cast_ballot(&ballot).await? {
            CastOutcome::Cast => {}
            CastOutcome::AlreadyVoted => return Err(already_voted),
        }

        self.issue_receipt(&mut ballot, &voter, &election, &candidate)
            .await;
        Ok(ballot)
    }

    /// Render and record the receipt of a committed ballot. Never fails: a
    /// rendering failure is recorded on the ballot for a later retry.
    async fn issue_receipt(
        &self,
        ballot: &mut Ballot,
        voter: &Voter,
        election: &Election,
        candidate: &Candidate,
    ) {
        let document = ReceiptDocument::new(ballot, voter, election, candidate);
        let status = match self.renderer.render(&document).await {
            Ok(path) => ReceiptStatus::Generated {
                path: path.display().to_string(),
            },
            Err(e) => {
                warn!("Receipt for ballot {} could not be rendered: {e}", ballot.id);
                ReceiptStatus::Failed {
                    reason: e.to_string(),
                    attempts: ballot.receipt.failed_attempts() + 1,
                }
            }
        };
        match self.store.record_receipt(ballot.id, &status).await {
            Ok(()) => ballot.receipt = status,
            Err(e) => error!("Failed to record receipt status of ballot {}: {e}", ballot.id),
        }
    }

    /// Render the receipt of a ballot again, if it has not been generated yet.
    /// Returns the ballot with its updated receipt status.
    pub async fn retry_receipt(&self, ballot_id: Id) -> Result<Ballot> {
        let mut ballot = self
            .store
            .ballot_by_id(ballot_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("ballot {ballot_id}")))?;
        if ballot.receipt_generated() {
            return Ok(ballot);
        }

        let voter = self
            .store
            .voter_by_id(ballot.voter_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {}", ballot.voter_id)))?;
        let election = self
            .store
            .election_by_id(ballot.election_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("election {}", ballot.election_id)))?;
        let candidate = self
            .store
            .candidate_by_id(ballot.candidate_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("candidate {}", ballot.candidate_id)))?;

        self.issue_receipt(&mut ballot, &voter, &election, &candidate)
            .await;
        Ok(ballot)
    }

    /// Compare the ballots of an election against its candidates' tallies.
    pub async fn tally_report(&self, election_id: Id) -> Result<TallyReport> {
        if self.store.election_by_id(election_id).await?.is_none() {
            return Err(Error::NotFound(format!("election {election_id}")));
        }
        let candidates = self.store.candidates_for_election(election_id).await?;
        let ballots = self.store.count_ballots(election_id).await?;
        let per_candidate: BTreeMap<_, _> = candidates
            .iter()
            .map(|c| (c.id, c.votes_count))
            .collect();
        Ok(TallyReport {
            election_id,
            ballots,
            votes: per_candidate.values().sum(),
            per_candidate,
        })
    }
}
