use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;

/// A unique identifier for a particular operation (cast, verify, enrol),
/// used to pair up its entry and exit log lines.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct OperationId(pub usize);

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl OperationId {
    /// Atomically get the next ID. This wraps around back to zero if you somehow exceed a usize.
    pub fn next() -> OperationId {
        static OPERATION_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
        OperationId(OPERATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Log the start of an operation.
pub fn log_entry(kind: &str, id: OperationId, detail: &str) {
    info!("->{kind}{id} {detail}");
}

/// Log the end of an operation: rejections at `warn`, internal failures at `error`.
pub fn log_exit<T>(kind: &str, id: OperationId, result: &Result<T, Error>, success: &str) {
    match result {
        Ok(_) => info!("<-{kind}{id} {success}"),
        Err(e) if e.is_rejection() => warn!("<-{kind}{id} rejected: {e}"),
        Err(e) => error!("<-{kind}{id} failed: {e}"),
    }
}
