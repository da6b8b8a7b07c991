//! Persistence for voters, elections, candidates and ballots.
//!
//! The casting pipeline only ever talks to a [`BallotStore`]. Two
//! implementations exist: [`MongoStore`] for deployment and [`MemoryStore`]
//! for tests and tooling.

use async_trait::async_trait;

use crate::crypto::{Ciphertext, SessionKey};
use crate::error::Result;
use crate::model::{
    ballot::{Ballot, ReceiptStatus},
    candidate::Candidate,
    election::Election,
    mongodb::Id,
    voter::{Hand, Voter},
};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Result of an attempt to commit a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOutcome {
    /// The ballot, tally increment and voter flag were all committed.
    Cast,
    /// A ballot for this (voter, election) already existed; nothing was changed.
    AlreadyVoted,
}

#[async_trait]
pub trait BallotStore: Send + Sync {
    async fn voter_by_code(&self, voter_code: &str) -> Result<Option<Voter>>;

    async fn voter_by_id(&self, voter_id: Id) -> Result<Option<Voter>>;

    async fn election_by_id(&self, election_id: Id) -> Result<Option<Election>>;

    /// Elections whose status is active, whatever their time window.
    async fn active_elections(&self) -> Result<Vec<Election>>;

    async fn candidate_by_id(&self, candidate_id: Id) -> Result<Option<Candidate>>;

    async fn candidates_for_election(&self, election_id: Id) -> Result<Vec<Candidate>>;

    async fn ballot_by_id(&self, ballot_id: Id) -> Result<Option<Ballot>>;

    /// Does a ballot already exist for this (voter, election)?
    /// Only a fast path; [`BallotStore::cast_ballot`] is what enforces uniqueness.
    async fn ballot_exists(&self, voter_id: Id, election_id: Id) -> Result<bool>;

    async fn count_ballots(&self, election_id: Id) -> Result<u64>;

    /// Atomically insert the ballot, increment its candidate's tally and mark
    /// its voter as having voted. Either all three happen or none do, and at
    /// most one ballot per (voter, election) is ever committed. A missing voter
    /// or candidate is [`Error::NotFound`](crate::error::Error::NotFound).
    async fn cast_ballot(&self, ballot: &Ballot) -> Result<CastOutcome>;

    /// Update the receipt status of a committed ballot.
    async fn record_receipt(&self, ballot_id: Id, status: &ReceiptStatus) -> Result<()>;

    /// All ballots whose receipt has not been generated yet.
    async fn pending_receipts(&self) -> Result<Vec<Ballot>>;

    /// Bind `key` to the voter unless a key is already bound, atomically.
    /// Returns whichever key is bound afterwards.
    async fn bind_key_if_absent(&self, voter_id: Id, key: &SessionKey) -> Result<SessionKey>;

    /// Store an encrypted template in one of the voter's slots.
    async fn set_template(&self, voter_id: Id, hand: Hand, template: &Ciphertext) -> Result<()>;

    /// Insert or replace a voter.
    async fn save_voter(&self, voter: &Voter) -> Result<()>;

    /// Insert or replace an election.
    async fn save_election(&self, election: &Election) -> Result<()>;

    /// Insert or replace a candidate.
    async fn save_candidate(&self, candidate: &Candidate) -> Result<()>;
}
