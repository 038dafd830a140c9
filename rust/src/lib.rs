//! Storage and verification of ForPrompt project API keys.
//!
//! Keys are kept only inside an AES-256-GCM envelope keyed from a master
//! secret. Verification goes through a `(prefix, hash)` index when a record
//! has one and falls back to scanning unindexed records otherwise, so both
//! storage formats authenticate correctly while the migration runner
//! upgrades the old one in place.

pub mod admin;
pub mod boundary;
pub mod config;
pub mod crypto;
pub mod error;
pub mod key;
pub mod logging;
pub mod migration;
pub mod record;
pub mod service;
pub mod store;
pub mod verifier;

pub use error::KeyError;
pub use record::{KeyRecord, OwnerId};
pub use service::{IssuedKey, KeyService};
pub use verifier::{MatchPath, Verdict};
