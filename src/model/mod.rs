//! Stored entities and their database plumbing.
//!
//! Every entity comes as an `XCore` holding its data plus an `X` that adds the
//! unique `_id` and derefs to the core.

pub mod ballot;
pub mod candidate;
pub mod election;
pub mod mongodb;
pub mod voter;
