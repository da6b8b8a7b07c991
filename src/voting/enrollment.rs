use std::sync::Arc;

use crate::crypto::{self, SessionKey};
use crate::error::{Error, Result};
use crate::logging::{log_entry, log_exit, OperationId};
use crate::model::voter::{Hand, Voter};
use crate::store::BallotStore;

/// Raw palm templates captured for one voter. Either hand may be missing.
#[derive(Default)]
pub struct PalmTemplates<'a> {
    pub left: Option<&'a [u8]>,
    pub right: Option<&'a [u8]>,
}

impl<'a> PalmTemplates<'a> {
    fn by_hand(&self) -> impl Iterator<Item = (Hand, &'a [u8])> {
        [(Hand::Left, self.left), (Hand::Right, self.right)]
            .into_iter()
            .filter_map(|(hand, template)| template.map(|t| (hand, t)))
    }

    fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }
}

/// Registers palm templates against existing voters, sealing each under the
/// voter's one encryption key.
pub struct Enrollment {
    store: Arc<dyn BallotStore>,
}

impl Enrollment {
    pub fn new(store: Arc<dyn BallotStore>) -> Self {
        Self { store }
    }

    /// Encrypt and store the given templates for a voter.
    ///
    /// The voter's key is used if one is bound. Otherwise `supplied_key` (or a
    /// freshly issued key) is bound first. A supplied key that disagrees with
    /// the bound one is refused, since the key never changes once set.
    pub async fn enroll(
        &self,
        voter_code: &str,
        templates: PalmTemplates<'_>,
        supplied_key: Option<&SessionKey>,
    ) -> Result<Voter> {
        let id = OperationId::next();
        log_entry("enrol", id, &format!("voter {voter_code}"));
        let result = self.enroll_inner(voter_code, templates, supplied_key).await;
        log_exit("enrol", id, &result, "templates stored");
        result
    }

    async fn enroll_inner(
        &self,
        voter_code: &str,
        templates: PalmTemplates<'_>,
        supplied_key: Option<&SessionKey>,
    ) -> Result<Voter> {
        let voter = self
            .store
            .voter_by_code(voter_code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {voter_code}")))?;
        if templates.is_empty() {
            return Err(Error::BadRequest("no palm template supplied".to_string()));
        }

        let key = match &voter.encryption_key {
            Some(existing) => existing.clone(),
            None => {
                let proposed = supplied_key.cloned().unwrap_or_else(SessionKey::random);
                self.store.bind_key_if_absent(voter.id, &proposed).await?
            }
        };
        if supplied_key.map_or(false, |supplied| *supplied != key) {
            return Err(Error::KeyConflict(voter_code.to_string()));
        }

        for (hand, template) in templates.by_hand() {
            let sealed = crypto::encrypt(template, &key)?;
            self.store.set_template(voter.id, hand, &sealed).await?;
            debug!("Stored {hand:?} template for voter {voter_code}");
        }

        self.store
            .voter_by_id(voter.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("voter {voter_code}")))
    }
}
