use mongodb::error::Error as DbError;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::model::mongodb::Id;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Voter {voter} has already voted in election {election}")]
    AlreadyVoted { voter: Id, election: Id },
    #[error("Candidate {candidate} does not stand in election {election}")]
    CandidateMismatch { candidate: Id, election: Id },
    #[error("Election {0} is not accepting ballots")]
    ElectionClosed(Id),
    #[error("Voter {0} has no encryption key")]
    KeyMissing(String),
    #[error("Voter {0} is already bound to a different encryption key")]
    KeyConflict(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Config(#[from] figment::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl Error {
    /// Is this a rejection of the request itself, rather than an internal failure?
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::AlreadyVoted { .. }
                | Self::CandidateMismatch { .. }
                | Self::ElectionClosed(_)
                | Self::KeyMissing(_)
                | Self::KeyConflict(_)
                | Self::BadRequest(_)
        )
    }
}

/// Reasons a receipt could not be produced. None of these affect the ballot.
#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("Failed to write receipt: {0}")]
    Io(#[from] std::io::Error),
    #[error("Receipt renderer rejected the document: {0}")]
    Rejected(String),
}
