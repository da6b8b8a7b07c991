use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BallotStore, CastOutcome};
use crate::crypto::{Ciphertext, SessionKey};
use crate::error::{Error, Result};
use crate::model::{
    ballot::{Ballot, ReceiptStatus},
    candidate::Candidate,
    election::{Election, ElectionStatus},
    mongodb::Id,
    voter::{Hand, Voter},
};

#[derive(Default)]
struct Tables {
    voters: HashMap<Id, Voter>,
    elections: HashMap<Id, Election>,
    candidates: HashMap<Id, Candidate>,
    ballots: HashMap<Id, Ballot>,
}

impl Tables {
    fn has_ballot(&self, voter_id: Id, election_id: Id) -> bool {
        self.ballots
            .values()
            .any(|b| b.voter_id == voter_id && b.election_id == election_id)
    }
}

/// An in-process store. Every operation holds the one lock for its whole
/// duration, so each is trivially atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BallotStore for MemoryStore {
    async fn voter_by_code(&self, voter_code: &str) -> Result<Option<Voter>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .voters
            .values()
            .find(|v| v.voter_code == voter_code)
            .cloned())
    }

    async fn voter_by_id(&self, voter_id: Id) -> Result<Option<Voter>> {
        Ok(self.tables.lock().await.voters.get(&voter_id).cloned())
    }

    async fn election_by_id(&self, election_id: Id) -> Result<Option<Election>> {
        Ok(self.tables.lock().await.elections.get(&election_id).cloned())
    }

    async fn active_elections(&self) -> Result<Vec<Election>> {
        let tables = self.tables.lock().await;
        let mut elections: Vec<_> = tables
            .elections
            .values()
            .filter(|e| e.status == ElectionStatus::Active)
            .cloned()
            .collect();
        elections.sort_by_key(|e| e.id);
        Ok(elections)
    }

    async fn candidate_by_id(&self, candidate_id: Id) -> Result<Option<Candidate>> {
        Ok(self.tables.lock().await.candidates.get(&candidate_id).cloned())
    }

    async fn candidates_for_election(&self, election_id: Id) -> Result<Vec<Candidate>> {
        let tables = self.tables.lock().await;
        let mut candidates: Vec<_> = tables
            .candidates
            .values()
            .filter(|c| c.election_id == election_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| c.id);
        Ok(candidates)
    }

    async fn ballot_by_id(&self, ballot_id: Id) -> Result<Option<Ballot>> {
        Ok(self.tables.lock().await.ballots.get(&ballot_id).cloned())
    }

    async fn ballot_exists(&self, voter_id: Id, election_id: Id) -> Result<bool> {
        Ok(self.tables.lock().await.has_ballot(voter_id, election_id))
    }

    async fn count_ballots(&self, election_id: Id) -> Result<u64> {
        let tables = self.tables.lock().await;
        Ok(tables
            .ballots
            .values()
            .filter(|b| b.election_id == election_id)
            .count() as u64)
    }

    async fn cast_ballot(&self, ballot: &Ballot) -> Result<CastOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.has_ballot(ballot.voter_id, ballot.election_id) {
            return Ok(CastOutcome::AlreadyVoted);
        }
        // Check everything before touching anything.
        if !tables.voters.contains_key(&ballot.voter_id) {
            return Err(Error::NotFound(format!("voter {}", ballot.voter_id)));
        }
        if !tables.candidates.contains_key(&ballot.candidate_id) {
            return Err(Error::NotFound(format!("candidate {}", ballot.candidate_id)));
        }

        if let Some(candidate) = tables.candidates.get_mut(&ballot.candidate_id) {
            candidate.votes_count += 1;
        }
        if let Some(voter) = tables.voters.get_mut(&ballot.voter_id) {
            voter.has_voted = true;
            voter.last_voted_at = Some(ballot.cast_at);
        }
        tables.ballots.insert(ballot.id, ballot.clone());
        Ok(CastOutcome::Cast)
    }

    async fn record_receipt(&self, ballot_id: Id, status: &ReceiptStatus) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let ballot = tables
            .ballots
            .get_mut(&ballot_id)
            .ok_or_else(|| Error::NotFound(format!("ballot {ballot_id}")))?;
        ballot.receipt = status.clone();
        Ok(())
    }

    async fn pending_receipts(&self) -> Result<Vec<Ballot>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .ballots
            .values()
            .filter(|b| !b.receipt_generated())
            .cloned()
            .collect())
    }

    async fn bind_key_if_absent(&self, voter_id: Id, key: &SessionKey) -> Result<SessionKey> {
        let mut tables = self.tables.lock().await;
        let voter = tables
            .voters
            .get_mut(&voter_id)
            .ok_or_else(|| Error::NotFound(format!("voter {voter_id}")))?;
        Ok(voter.bind_key(key.clone()).clone())
    }

    async fn set_template(&self, voter_id: Id, hand: Hand, template: &Ciphertext) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let voter = tables
            .voters
            .get_mut(&voter_id)
            .ok_or_else(|| Error::NotFound(format!("voter {voter_id}")))?;
        voter.set_template(hand, template.clone());
        Ok(())
    }

    async fn save_voter(&self, voter: &Voter) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let code_taken = tables
            .voters
            .values()
            .any(|v| v.voter_code == voter.voter_code && v.id != voter.id);
        if code_taken {
            return Err(Error::BadRequest(format!(
                "voter code {} is already registered",
                voter.voter_code
            )));
        }
        tables.voters.insert(voter.id, voter.clone());
        Ok(())
    }

    async fn save_election(&self, election: &Election) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.elections.insert(election.id, election.clone());
        Ok(())
    }

    async fn save_candidate(&self, candidate: &Candidate) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.candidates.insert(candidate.id, candidate.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{candidate::CandidateCore, election::ElectionCore, voter::VoterCore};

    async fn seeded() -> (MemoryStore, Voter, Election, Candidate) {
        let store = MemoryStore::new();
        let voter = Voter::new(VoterCore::example());
        let election = Election::new(ElectionCore::current_example());
        let candidate = Candidate::new(CandidateCore::example1(election.id));
        store.save_voter(&voter).await.unwrap();
        store.save_election(&election).await.unwrap();
        store.save_candidate(&candidate).await.unwrap();
        (store, voter, election, candidate)
    }

    #[tokio::test]
    async fn cast_commits_everything() {
        let (store, voter, election, candidate) = seeded().await;
        let ballot = Ballot::new(&voter, &election, &candidate);

        assert_eq!(store.cast_ballot(&ballot).await.unwrap(), CastOutcome::Cast);
        assert!(store.ballot_exists(voter.id, election.id).await.unwrap());
        assert_eq!(store.count_ballots(election.id).await.unwrap(), 1);

        let candidate = store.candidate_by_id(candidate.id).await.unwrap().unwrap();
        assert_eq!(candidate.votes_count, 1);
        let voter = store.voter_by_code("V100").await.unwrap().unwrap();
        assert!(voter.has_voted);
        assert_eq!(voter.last_voted_at, Some(ballot.cast_at));
    }

    #[tokio::test]
    async fn second_cast_changes_nothing() {
        let (store, voter, election, candidate) = seeded().await;
        let first = Ballot::new(&voter, &election, &candidate);
        let second = Ballot::new(&voter, &election, &candidate);

        assert_eq!(store.cast_ballot(&first).await.unwrap(), CastOutcome::Cast);
        assert_eq!(
            store.cast_ballot(&second).await.unwrap(),
            CastOutcome::AlreadyVoted
        );
        assert_eq!(store.count_ballots(election.id).await.unwrap(), 1);
        assert!(store.ballot_by_id(second.id).await.unwrap().is_none());
        let candidate = store.candidate_by_id(candidate.id).await.unwrap().unwrap();
        assert_eq!(candidate.votes_count, 1);
    }

    #[tokio::test]
    async fn missing_candidate_leaves_no_trace() {
        let (store, voter, election, _) = seeded().await;
        let ghost = Candidate::new(CandidateCore::example2(election.id));
        let ballot = Ballot::new(&voter, &election, &ghost);

        assert!(matches!(
            store.cast_ballot(&ballot).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(store.count_ballots(election.id).await.unwrap(), 0);
        assert!(!store.voter_by_id(voter.id).await.unwrap().unwrap().has_voted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_key_binding_agrees() {
        let (store, voter, _, _) = seeded().await;
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .bind_key_if_absent(voter.id, &SessionKey::random())
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut keys = Vec::new();
        for handle in handles {
            keys.push(handle.await.unwrap());
        }
        assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test]
    async fn closed_elections_not_listed() {
        let (store, _, election, _) = seeded().await;
        let mut closed = Election::new(ElectionCore::finished_example());
        closed.status = ElectionStatus::Closed;
        store.save_election(&closed).await.unwrap();
        // Past its end time but never closed.
        let lapsed = Election::new(ElectionCore::finished_example());
        store.save_election(&lapsed).await.unwrap();

        let ids: Vec<_> = store
            .active_elections()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&election.id));
        assert!(ids.contains(&lapsed.id));
        assert!(!ids.contains(&closed.id));
    }

    #[tokio::test]
    async fn pending_receipts_and_codes() {
        let (store, voter, election, candidate) = seeded().await;
        let ballot = Ballot::new(&voter, &election, &candidate);
        store.cast_ballot(&ballot).await.unwrap();
        assert_eq!(store.pending_receipts().await.unwrap().len(), 1);

        let generated = ReceiptStatus::Generated {
            path: "/tmp/receipt.txt".to_string(),
        };
        store.record_receipt(ballot.id, &generated).await.unwrap();
        assert!(store.pending_receipts().await.unwrap().is_empty());

        // A different voter may not take an existing code.
        let clash = Voter::new(VoterCore::example());
        assert!(matches!(
            store.save_voter(&clash).await,
            Err(Error::BadRequest(_))
        ));
    }
}
