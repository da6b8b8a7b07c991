//! Shared fixtures for the voting tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use super::caster::BallotCaster;
use super::receipt::{FileReceiptRenderer, ReceiptDocument, ReceiptRenderer};
use crate::error::ReceiptError;
use crate::model::{
    candidate::{Candidate, CandidateCore},
    election::{Election, ElectionCore},
    mongodb::Id,
    voter::{Voter, VoterCore},
};
use crate::store::{BallotStore, MemoryStore};

/// A seeded in-memory store: voter V100, an open election with two
/// candidates, and a candidate standing in a different election.
pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub voter: Voter,
    pub election: Election,
    pub candidate: Candidate,
    pub other_candidate: Candidate,
    pub foreign_candidate: Candidate,
    pub receipts: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let voter = Voter::new(VoterCore::example());
        let election = Election::new(ElectionCore::current_example());
        let other_election = Election::new(ElectionCore::current_example());
        let candidate = Candidate::new(CandidateCore::example1(election.id));
        let other_candidate = Candidate::new(CandidateCore::example2(election.id));
        let foreign_candidate = Candidate::new(CandidateCore::example1(other_election.id));

        store.save_voter(&voter).await.unwrap();
        store.save_election(&election).await.unwrap();
        store.save_election(&other_election).await.unwrap();
        for c in [&candidate, &other_candidate, &foreign_candidate] {
            store.save_candidate(c).await.unwrap();
        }

        Self {
            store,
            voter,
            election,
            candidate,
            other_candidate,
            foreign_candidate,
            receipts: tempfile::tempdir().unwrap(),
        }
    }

    /// A caster writing receipts into this fixture's temporary directory.
    pub fn caster(&self) -> BallotCaster {
        let renderer = Arc::new(FileReceiptRenderer::new(self.receipts.path()));
        BallotCaster::new(self.store.clone(), renderer)
    }

    pub async fn votes_for(&self, candidate: Id) -> u64 {
        self.store
            .candidate_by_id(candidate)
            .await
            .unwrap()
            .unwrap()
            .votes_count
    }

    /// Register `count` more voters, returning their codes.
    pub async fn add_voters(&self, count: usize) -> Vec<String> {
        let mut codes = Vec::with_capacity(count);
        for i in 0..count {
            let code = format!("W{i:04}");
            let voter = Voter::new(VoterCore::new(code.clone(), format!("Voter {i}")));
            self.store.save_voter(&voter).await.unwrap();
            codes.push(code);
        }
        codes
    }
}

/// A renderer that can be switched between failing and succeeding.
pub(crate) struct FlakyRenderer {
    failing: AtomicBool,
    renders: AtomicUsize,
}

impl FlakyRenderer {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            renders: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of render attempts so far, failed or not.
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiptRenderer for FlakyRenderer {
    async fn render(&self, receipt: &ReceiptDocument) -> Result<PathBuf, ReceiptError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReceiptError::Rejected("printer offline".to_string()));
        }
        Ok(PathBuf::from(format!("/receipts/{}.txt", receipt.ballot_id)))
    }
}
