use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElectionStatus {
    Active,
    Closed,
}

/// Core election data, as stored in the database.
///
/// Elections do not hold their candidates; each candidate refers to its election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionCore {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ElectionStatus,
}

impl ElectionCore {
    /// Create a new, active election.
    pub fn new(title: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            start_time,
            end_time,
            status: ElectionStatus::Active,
        }
    }

    /// Is the election accepting ballots at the given instant?
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        self.status == ElectionStatus::Active && self.start_time <= at && at <= self.end_time
    }
}

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub election: ElectionCore,
}

impl Election {
    pub fn new(election: ElectionCore) -> Self {
        Self {
            id: Id::new(),
            election,
        }
    }
}

impl Deref for Election {
    type Target = ElectionCore;

    fn deref(&self) -> &Self::Target {
        &self.election
    }
}

impl DerefMut for Election {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.election
    }
}


#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn open_window() {
        let mut election = ElectionCore::current_example();
        let now = Utc::now();
        assert!(election.is_open_at(now));
        assert!(!election.is_open_at(now - Duration::hours(2)));
        assert!(!election.is_open_at(now + Duration::days(2)));

        election.status = ElectionStatus::Closed;
        assert!(!election.is_open_at(now));

        assert!(!ElectionCore::finished_example().is_open_at(now));
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(serde_json::to_string(&ElectionStatus::Active).unwrap(), "\"ACTIVE\"");
        assert_eq!(
            serde_json::from_str::<ElectionStatus>("\"CLOSED\"").unwrap(),
            ElectionStatus::Closed
        );
    }
}
