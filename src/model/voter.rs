use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::biometric::StoredTemplates;
use crate::crypto::{Ciphertext, SessionKey};
use crate::model::mongodb::Id;

/// Which palm a template was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    /// Name of the stored field holding this hand's template.
    pub fn field_name(self) -> &'static str {
        match self {
            Hand::Left => "left_template",
            Hand::Right => "right_template",
        }
    }
}

/// Core voter data, as stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterCore {
    /// Public, unique voter code used to look the voter up.
    pub voter_code: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_template: Option<Ciphertext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_template: Option<Ciphertext>,
    /// Key every template of this voter is sealed under. Set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<SessionKey>,
    #[serde(default)]
    pub has_voted: bool,
    #[serde(default)]
    pub last_voted_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
}

impl VoterCore {
    /// Create a voter with no templates and no key.
    pub fn new(voter_code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            voter_code: voter_code.into(),
            name: name.into(),
            left_template: None,
            right_template: None,
            encryption_key: None,
            has_voted: false,
            last_voted_at: None,
            registered_at: Utc::now(),
        }
    }

    pub fn template(&self, hand: Hand) -> Option<&Ciphertext> {
        match hand {
            Hand::Left => self.left_template.as_ref(),
            Hand::Right => self.right_template.as_ref(),
        }
    }

    pub fn set_template(&mut self, hand: Hand, template: Ciphertext) {
        match hand {
            Hand::Left => self.left_template = Some(template),
            Hand::Right => self.right_template = Some(template),
        }
    }

    /// The stored templates, ready for matching.
    pub fn templates(&self) -> StoredTemplates<'_> {
        StoredTemplates {
            left: self.left_template.as_ref(),
            right: self.right_template.as_ref(),
        }
    }

    /// Bind `key` unless a key is already bound. Returns the key in force
    /// afterwards, which is the previously bound one if there was one.
    pub fn bind_key(&mut self, key: SessionKey) -> &SessionKey {
        self.encryption_key.get_or_insert(key)
    }
}

/// A voter from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Voter {
    pub fn new(voter: VoterCore) -> Self {
        Self { id: Id::new(), voter }
    }
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}
