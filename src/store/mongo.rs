use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson},
    error::{Error as DbError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::ReplaceOptions,
    Client, ClientSession, Database,
};

use super::{BallotStore, CastOutcome};
use crate::crypto::{Ciphertext, SessionKey};
use crate::error::{Error, Result};
use crate::model::{
    ballot::{Ballot, ReceiptStatus},
    candidate::Candidate,
    election::{Election, ElectionStatus},
    mongodb::{ensure_indexes_exist, is_duplicate_key_error, Coll, Id},
    voter::{Hand, Voter},
};

/// A store backed by MongoDB.
///
/// Casting relies on multi-document transactions, so the server must be a
/// replica set or sharded cluster.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
    voters: Coll<Voter>,
    elections: Coll<Election>,
    candidates: Coll<Candidate>,
    ballots: Coll<Ballot>,
}

impl MongoStore {
    /// Wrap the given database, first making sure its indexes exist.
    pub async fn new(client: Client, db: Database) -> Result<Self> {
        ensure_indexes_exist(&db).await?;
        Ok(Self {
            voters: Coll::from_db(&db),
            elections: Coll::from_db(&db),
            candidates: Coll::from_db(&db),
            ballots: Coll::from_db(&db),
            client,
            db,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The three writes of a cast, inside the session's current transaction.
    async fn cast_in_transaction(
        &self,
        ballot: &Ballot,
        session: &mut ClientSession,
    ) -> std::result::Result<(), CastFailure> {
        // Fails with a duplicate key error if the voter already has a ballot here.
        self.ballots
            .insert_one_with_session(ballot, None, session)
            .await?;

        let increment = doc! { "$inc": { "votes_count": 1_i64 } };
        let counted = self
            .candidates
            .update_one_with_session(ballot.candidate_id.as_doc(), increment, None, session)
            .await?;
        if counted.matched_count == 0 {
            return Err(CastFailure::Missing(format!(
                "candidate {}",
                ballot.candidate_id
            )));
        }

        let mark_voted = doc! {
            "$set": {
                "has_voted": true,
                "last_voted_at": to_bson(&ballot.cast_at).map_err(DbError::from)?,
            }
        };
        let marked = self
            .voters
            .update_one_with_session(ballot.voter_id.as_doc(), mark_voted, None, session)
            .await?;
        if marked.matched_count == 0 {
            return Err(CastFailure::Missing(format!("voter {}", ballot.voter_id)));
        }

        Ok(())
    }

    /// Commit the session's transaction, retrying a bounded number of times
    /// while the outcome is unknown.
    async fn commit(session: &mut ClientSession) -> std::result::Result<(), DbError> {
        let mut retries = Attempts::new(MAX_TRANSACTION_RETRIES);
        loop {
            match session.commit_transaction().await {
                Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) && retries.take() => {
                    debug!("Commit result unknown, retrying commit");
                }
                result => return result,
            }
        }
    }
}

/// Retries allowed for one cast transaction, and separately for its commit.
const MAX_TRANSACTION_RETRIES: u32 = 8;

/// Why a cast transaction was abandoned before commit.
#[derive(Debug)]
enum CastFailure {
    Db(DbError),
    /// A document the ballot refers to does not exist.
    Missing(String),
}

impl From<DbError> for CastFailure {
    fn from(e: DbError) -> Self {
        Self::Db(e)
    }
}

/// A fixed budget of retries.
#[derive(Debug)]
struct Attempts {
    used: u32,
    max: u32,
}

impl Attempts {
    fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Spend one retry. False once the budget is exhausted.
    fn take(&mut self) -> bool {
        if self.used >= self.max {
            return false;
        }
        self.used += 1;
        true
    }
}

#[async_trait]
impl BallotStore for MongoStore {
    async fn voter_by_code(&self, voter_code: &str) -> Result<Option<Voter>> {
        Ok(self
            .voters
            .find_one(doc! { "voter_code": voter_code }, None)
            .await?)
    }

    async fn voter_by_id(&self, voter_id: Id) -> Result<Option<Voter>> {
        Ok(self.voters.find_one(voter_id.as_doc(), None).await?)
    }

    async fn election_by_id(&self, election_id: Id) -> Result<Option<Election>> {
        Ok(self.elections.find_one(election_id.as_doc(), None).await?)
    }

    async fn active_elections(&self) -> Result<Vec<Election>> {
        let filter = doc! { "status": to_bson(&ElectionStatus::Active).map_err(DbError::from)? };
        let elections = self.elections.find(filter, None).await?.try_collect().await?;
        Ok(elections)
    }

    async fn candidate_by_id(&self, candidate_id: Id) -> Result<Option<Candidate>> {
        Ok(self.candidates.find_one(candidate_id.as_doc(), None).await?)
    }

    async fn candidates_for_election(&self, election_id: Id) -> Result<Vec<Candidate>> {
        let candidates = self
            .candidates
            .find(doc! { "election_id": election_id }, None)
            .await?
            .try_collect()
            .await?;
        Ok(candidates)
    }

    async fn ballot_by_id(&self, ballot_id: Id) -> Result<Option<Ballot>> {
        Ok(self.ballots.find_one(ballot_id.as_doc(), None).await?)
    }

    async fn ballot_exists(&self, voter_id: Id, election_id: Id) -> Result<bool> {
        let filter = doc! { "voter_id": voter_id, "election_id": election_id };
        Ok(self.ballots.count_documents(filter, None).await? > 0)
    }

    async fn count_ballots(&self, election_id: Id) -> Result<u64> {
        let filter = doc! { "election_id": election_id };
        Ok(self.ballots.count_documents(filter, None).await?)
    }

    async fn cast_ballot(&self, ballot: &Ballot) -> Result<CastOutcome> {
        let mut session = self.client.start_session(None).await?;
        let mut retries = Attempts::new(MAX_TRANSACTION_RETRIES);
        loop {
            session.start_transaction(None).await?;
            let result = match self.cast_in_transaction(ballot, &mut session).await {
                Ok(()) => Self::commit(&mut session).await.map_err(CastFailure::Db),
                Err(e) => {
                    let _ = session.abort_transaction().await;
                    Err(e)
                }
            };
            match result {
                Ok(()) => return Ok(CastOutcome::Cast),
                Err(CastFailure::Missing(what)) => return Err(Error::NotFound(what)),
                Err(CastFailure::Db(e)) if is_duplicate_key_error(&e) => {
                    return Ok(CastOutcome::AlreadyVoted)
                }
                Err(CastFailure::Db(e))
                    if e.contains_label(TRANSIENT_TRANSACTION_ERROR) && retries.take() =>
                {
                    debug!("Transient error casting ballot {}, retrying: {e}", ballot.id);
                }
                Err(CastFailure::Db(e)) => return Err(e.into()),
            }
        }
    }

    async fn record_receipt(&self, ballot_id: Id, status: &ReceiptStatus) -> Result<()> {
        let update = doc! { "$set": { "receipt": to_bson(status).map_err(DbError::from)? } };
        let result = self
            .ballots
            .update_one(ballot_id.as_doc(), update, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::NotFound(format!("ballot {ballot_id}")));
        }
        Ok(())
    }

    async fn pending_receipts(&self) -> Result<Vec<Ballot>> {
        let filter = doc! { "receipt.state": { "$ne": "Generated" } };
        let ballots = self.ballots.find(filter, None).await?.try_collect().await?;
        Ok(ballots)
    }

    async fn bind_key_if_absent(&self, voter_id: Id, key: &SessionKey) -> Result<SessionKey> {
        // Matches a missing field as well as an explicit null.
        let mut filter = voter_id.as_doc();
        filter.insert("encryption_key", Bson::Null);
        let update = doc! { "$set": { "encryption_key": key.to_base64() } };
        self.voters.update_one(filter, update, None).await?;

        // Whoever won, read back the key now in force.
        let mut voter = self
            .voter_by_id(voter_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {voter_id}")))?;
        voter
            .encryption_key
            .take()
            .ok_or_else(|| Error::KeyMissing(voter.voter_code.clone()))
    }

    async fn set_template(&self, voter_id: Id, hand: Hand, template: &Ciphertext) -> Result<()> {
        let update = doc! { "$set": { hand.field_name(): template.to_base64() } };
        let result = self.voters.update_one(voter_id.as_doc(), update, None).await?;
        if result.matched_count == 0 {
            return Err(Error::NotFound(format!("voter {voter_id}")));
        }
        Ok(())
    }

    async fn save_voter(&self, voter: &Voter) -> Result<()> {
        let upsert = ReplaceOptions::builder().upsert(true).build();
        self.voters.replace_one(voter.id.as_doc(), voter, upsert).await?;
        Ok(())
    }

    async fn save_election(&self, election: &Election) -> Result<()> {
        let upsert = ReplaceOptions::builder().upsert(true).build();
        self.elections
            .replace_one(election.id.as_doc(), election, upsert)
            .await?;
        Ok(())
    }

    async fn save_candidate(&self, candidate: &Candidate) -> Result<()> {
        let upsert = ReplaceOptions::builder().upsert(true).build();
        self.candidates
            .replace_one(candidate.id.as_doc(), candidate, upsert)
            .await?;
        Ok(())
    }
}

/// Connect to the test server named by `PALMVOTE_TEST_DB_URI`, on a fresh
/// randomly-named database. `None` if the variable is not set.
#[cfg(test)]
pub(crate) async fn test_store() -> Option<MongoStore> {
    let uri = std::env::var("PALMVOTE_TEST_DB_URI").ok()?;
    let store = crate::config::DbConfig::for_tests(uri)
        .connect()
        .await
        .unwrap();
    Some(store)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{candidate::CandidateCore, election::ElectionCore, voter::VoterCore};

    async fn seed(store: &MongoStore) -> (Voter, Election, Candidate) {
        let voter = Voter::new(VoterCore::example());
        let election = Election::new(ElectionCore::current_example());
        let candidate = Candidate::new(CandidateCore::example1(election.id));
        store.save_voter(&voter).await.unwrap();
        store.save_election(&election).await.unwrap();
        store.save_candidate(&candidate).await.unwrap();
        (voter, election, candidate)
    }

    #[backend_test]
    async fn entities_round_trip(store: MongoStore) {
        let (voter, election, candidate) = seed(&store).await;

        let found = store.voter_by_code("V100").await.unwrap().unwrap();
        assert_eq!(found.id, voter.id);
        assert!(found.encryption_key.is_none());
        let found = store.election_by_id(election.id).await.unwrap().unwrap();
        assert_eq!(found.title, election.title);
        assert_eq!(found.end_time, election.end_time);
        assert_eq!(
            store.candidate_by_id(candidate.id).await.unwrap(),
            Some(candidate.clone())
        );
        assert_eq!(
            store.candidates_for_election(election.id).await.unwrap(),
            vec![candidate]
        );
    }

    #[backend_test]
    async fn cast_is_atomic_and_unique(store: MongoStore) {
        let (voter, election, candidate) = seed(&store).await;
        let first = Ballot::new(&voter, &election, &candidate);
        let second = Ballot::new(&voter, &election, &candidate);

        assert_eq!(store.cast_ballot(&first).await.unwrap(), CastOutcome::Cast);
        assert_eq!(
            store.cast_ballot(&second).await.unwrap(),
            CastOutcome::AlreadyVoted
        );

        assert_eq!(store.count_ballots(election.id).await.unwrap(), 1);
        assert_eq!(store.ballot_by_id(first.id).await.unwrap(), Some(first.clone()));
        let candidate = store.candidate_by_id(candidate.id).await.unwrap().unwrap();
        assert_eq!(candidate.votes_count, 1);
        let voter = store.voter_by_id(voter.id).await.unwrap().unwrap();
        assert!(voter.has_voted);
        assert_eq!(voter.last_voted_at, Some(first.cast_at));
    }

    #[backend_test]
    async fn missing_references_leave_no_trace(store: MongoStore) {
        let (voter, election, _) = seed(&store).await;
        let ghost = Candidate::new(CandidateCore::example2(election.id));
        let ballot = Ballot::new(&voter, &election, &ghost);

        assert!(matches!(
            store.cast_ballot(&ballot).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(store.count_ballots(election.id).await.unwrap(), 0);
        assert!(!store.voter_by_id(voter.id).await.unwrap().unwrap().has_voted);

        // Same for a voter that was never saved.
        let saved = store.candidates_for_election(election.id).await.unwrap();
        let stranger = Voter::new(VoterCore::example2());
        let ballot = Ballot::new(&stranger, &election, &saved[0]);
        assert!(matches!(
            store.cast_ballot(&ballot).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(store.count_ballots(election.id).await.unwrap(), 0);
        let candidate = store.candidate_by_id(saved[0].id).await.unwrap().unwrap();
        assert_eq!(candidate.votes_count, 0);
    }

    #[backend_test]
    async fn only_active_elections_listed(store: MongoStore) {
        let (_, election, _) = seed(&store).await;
        let mut closed = Election::new(ElectionCore::finished_example());
        closed.status = ElectionStatus::Closed;
        store.save_election(&closed).await.unwrap();

        let active = store.active_elections().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, election.id);
    }

    #[test]
    fn retry_budget_runs_out() {
        let mut retries = Attempts::new(3);
        assert!(retries.take());
        assert!(retries.take());
        assert!(retries.take());
        assert!(!retries.take());
        assert!(!retries.take());
        assert!(!Attempts::new(0).take());
    }

    #[backend_test]
    async fn concurrent_casts_commit_once(store: MongoStore) {
        let (voter, election, candidate) = seed(&store).await;
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let ballot = Ballot::new(&voter, &election, &candidate);
                tokio::spawn(async move { store.cast_ballot(&ballot).await.unwrap() })
            })
            .collect();
        let mut cast = 0;
        for handle in handles {
            if handle.await.unwrap() == CastOutcome::Cast {
                cast += 1;
            }
        }
        assert_eq!(cast, 1);
        assert_eq!(store.count_ballots(election.id).await.unwrap(), 1);
        let candidate = store.candidate_by_id(candidate.id).await.unwrap().unwrap();
        assert_eq!(candidate.votes_count, 1);
    }

    #[backend_test]
    async fn receipts_and_keys(store: MongoStore, db: Database) {
        let (voter, election, candidate) = seed(&store).await;
        let ballot = Ballot::new(&voter, &election, &candidate);
        store.cast_ballot(&ballot).await.unwrap();
        assert_eq!(store.pending_receipts().await.unwrap().len(), 1);

        let failed = ReceiptStatus::Failed {
            reason: "printer offline".to_string(),
            attempts: 1,
        };
        store.record_receipt(ballot.id, &failed).await.unwrap();
        assert_eq!(store.pending_receipts().await.unwrap()[0].receipt, failed);
        let generated = ReceiptStatus::Generated {
            path: "/srv/receipts/x.txt".to_string(),
        };
        store.record_receipt(ballot.id, &generated).await.unwrap();
        assert!(store.pending_receipts().await.unwrap().is_empty());

        let first = SessionKey::random();
        let bound = store.bind_key_if_absent(voter.id, &first).await.unwrap();
        assert_eq!(bound, first);
        let bound = store
            .bind_key_if_absent(voter.id, &SessionKey::random())
            .await
            .unwrap();
        assert_eq!(bound, first);

        let template = crate::crypto::encrypt(&[1, 2, 3], &first).unwrap();
        store.set_template(voter.id, Hand::Left, &template).await.unwrap();
        let raw = db
            .collection::<mongodb::bson::Document>("voters")
            .find_one(voter.id.as_doc(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.get_str("left_template").unwrap(), template.to_base64());
        assert!(raw.get("right_template").is_none());
    }
}
