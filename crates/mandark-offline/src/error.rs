//! Error types for the offline signature store.

use std::path::PathBuf;

/// Errors from loading a signature store or decoding key material.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store file could not be read.
    #[error("failed to read signature store `{path}`: {source}")]
    Io {
        /// Path of the store file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The store is not valid YAML/JSON for its schema.
    #[error("failed to parse signature store: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A store entry is keyed by an invalid image reference.
    #[error("signature store entry: {0}")]
    InvalidReference(#[from] mandark_policy::ConfigError),

    /// A public key is not a PEM-encoded P-256 SPKI key.
    #[error("invalid public key: {0}")]
    InvalidKey(String),

    /// A signature is malformed or does not verify.
    #[error("signature verification failed: {0}")]
    InvalidSignature(String),
}
