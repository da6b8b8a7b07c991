//! The voter-facing operations: palm enrolment, scan verification, casting,
//! and the receipts that follow a cast.

pub mod caster;
pub mod enrollment;
pub mod receipt;
pub mod retries;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

pub use caster::{BallotCaster, TallyReport};
pub use enrollment::{Enrollment, PalmTemplates};
pub use receipt::{FileReceiptRenderer, ReceiptDocument, ReceiptRenderer};
pub use retries::ReceiptRetries;
pub use verification::ScanVerifier;
