//! Domain engine for Covrabl.
//!
//! Everything here is pure: no database, no HTTP. The API crate feeds policy
//! snapshots and extractions in, and persists what comes out.

pub mod auth;
pub mod deltas;
pub mod error;
pub mod explain;
pub mod policy;
pub mod premiums;
pub mod reminders;
pub mod scores;
