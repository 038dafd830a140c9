//! Cryptography for project keys. Lookup fingerprints never stand in for the
//! envelope check.

pub mod envelope;
pub mod fingerprint;
pub mod passwords;

pub use envelope::{CryptoError, EncryptionEngine, Envelope};
pub use fingerprint::{Fingerprinter, Sha256Fingerprinter};
