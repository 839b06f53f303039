//! Offline verification backend for `mandark-policy`.
//!
//! Signatures and attestations are read from a local signature store file
//! and verified with ECDSA P-256 public keys. Nothing is fetched from a
//! registry.

pub mod error;
pub mod keys;
pub mod store;
pub mod verifier;

pub use error::StoreError;
pub use store::{ImageArtifacts, SignatureStore, StoredAttestation, StoredSignature};
pub use verifier::OfflineVerifier;
