use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crypto::audit::canonical_timestamp;
use crate::error::ReceiptError;
use crate::model::{
    ballot::Ballot, candidate::Candidate, election::Election, mongodb::Id, voter::Voter,
};

/// Everything printed on a voter's receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDocument {
    pub ballot_id: Id,
    pub voter_name: String,
    pub voter_code: String,
    pub election_title: String,
    pub candidate_name: String,
    pub candidate_party: String,
    pub candidate_locality: String,
    pub cast_at: DateTime<Utc>,
    pub audit_hash: String,
}

impl ReceiptDocument {
    pub fn new(ballot: &Ballot, voter: &Voter, election: &Election, candidate: &Candidate) -> Self {
        Self {
            ballot_id: ballot.id,
            voter_name: voter.name.clone(),
            voter_code: voter.voter_code.clone(),
            election_title: election.title.clone(),
            candidate_name: candidate.name.clone(),
            candidate_party: candidate.party.clone(),
            candidate_locality: candidate.locality.clone(),
            cast_at: ballot.cast_at,
            audit_hash: ballot.audit_hash.clone(),
        }
    }
}

impl Display for ReceiptDocument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "VOTER VERIFIABLE PAPER AUDIT TRAIL")?;
        writeln!(f, "==================================")?;
        writeln!(f, "Ballot ID:  {}", self.ballot_id)?;
        writeln!(f, "Voter:      {} ({})", self.voter_name, self.voter_code)?;
        writeln!(f, "Election:   {}", self.election_title)?;
        writeln!(f, "Candidate:  {}", self.candidate_name)?;
        writeln!(f, "Party:      {}", self.candidate_party)?;
        writeln!(f, "Locality:   {}", self.candidate_locality)?;
        writeln!(f, "Cast at:    {}", canonical_timestamp(&self.cast_at))?;
        writeln!(f, "Audit hash: {}", self.audit_hash)?;
        writeln!(f)?;
        writeln!(
            f,
            "Keep this receipt. The audit hash lets you check that your ballot \
was recorded unaltered."
        )
    }
}

/// Produces a durable receipt document for a committed ballot.
#[async_trait]
pub trait ReceiptRenderer: Send + Sync {
    /// Render the receipt, returning where it was stored.
    async fn render(&self, receipt: &ReceiptDocument) -> Result<PathBuf, ReceiptError>;
}

/// Writes plain-text receipts into a directory, one file per ballot.
#[derive(Debug, Clone)]
pub struct FileReceiptRenderer {
    dir: PathBuf,
}

impl FileReceiptRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReceiptRenderer for FileReceiptRenderer {
    async fn render(&self, receipt: &ReceiptDocument) -> Result<PathBuf, ReceiptError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.txt", receipt.ballot_id));
        tokio::fs::write(&path, receipt.to_string()).await?;
        let path = tokio::fs::canonicalize(&path).await?;
        debug!("Wrote receipt for ballot {} to {}", receipt.ballot_id, path.display());
        Ok(path)
    }
}
