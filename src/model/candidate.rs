use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Core candidate data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    /// The one election this candidate stands in.
    pub election_id: Id,
    pub name: String,
    pub party: String,
    pub locality: String,
    /// Always equal to the number of ballots cast for this candidate.
    #[serde(default)]
    pub votes_count: u64,
}

impl CandidateCore {
    pub fn new(
        election_id: Id,
        name: impl Into<String>,
        party: impl Into<String>,
        locality: impl Into<String>,
    ) -> Self {
        Self {
            election_id,
            name: name.into(),
            party: party.into(),
            locality: locality.into(),
            votes_count: 0,
        }
    }
}

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Candidate {
    pub fn new(candidate: CandidateCore) -> Self {
        Self {
            id: Id::new(),
            candidate,
        }
    }
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}
