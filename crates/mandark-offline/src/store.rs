//! The offline signature store: signatures and attestations per image.

use std::collections::BTreeMap;
use std::path::Path;

use mandark_policy::ImageRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// A detached signature over an image payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSignature {
    /// Base64 payload bytes (a simple-signing JSON document).
    pub payload: String,
    /// Base64 ASN.1 DER ECDSA signature over the payload.
    pub signature: String,
    /// Certificate subject, if the signer recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Certificate issuer, if the signer recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// A signed in-toto statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttestation {
    /// Base64 in-toto statement JSON.
    pub payload: String,
    /// Base64 ASN.1 DER ECDSA signature over the payload.
    pub signature: String,
}

/// Everything stored for one image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifacts {
    /// Image signatures.
    #[serde(default)]
    pub signatures: Vec<StoredSignature>,
    /// Attestations.
    #[serde(default)]
    pub attestations: Vec<StoredAttestation>,
}

#[derive(Deserialize)]
struct StoreDocument {
    #[serde(default)]
    images: BTreeMap<String, ImageArtifacts>,
}

/// Signatures and attestations keyed by normalized image reference.
#[derive(Debug, Clone, Default)]
pub struct SignatureStore {
    images: BTreeMap<String, ImageArtifacts>,
}

impl SignatureStore {
    /// An empty store. Every lookup misses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a store from YAML (or JSON).
    ///
    /// Keys are normalized, so `nginx` and `docker.io/library/nginx:latest`
    /// refer to the same entry; entries that normalize to the same
    /// reference are merged.
    pub fn from_yaml(text: &str) -> Result<Self, StoreError> {
        let document: StoreDocument = serde_yaml::from_str(text)?;
        let mut store = Self::new();
        for (reference, artifacts) in document.images {
            let image = ImageRef::parse(&reference)?;
            store.insert(&image, artifacts);
        }
        debug!(images = store.len(), "loaded signature store");
        Ok(store)
    }

    /// Read and parse a store file.
    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Add artifacts for `image`, appending to any already stored.
    pub fn insert(&mut self, image: &ImageRef, artifacts: ImageArtifacts) {
        let entry = self.images.entry(image.to_string()).or_default();
        entry.signatures.extend(artifacts.signatures);
        entry.attestations.extend(artifacts.attestations);
    }

    /// Artifacts stored for `image`.
    #[must_use]
    pub fn lookup(&self, image: &ImageRef) -> Option<&ImageArtifacts> {
        self.images.get(&image.to_string())
    }

    /// Number of images with stored artifacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(s: &str) -> ImageRef {
        ImageRef::parse(s).expect("valid reference")
    }

    #[test]
    fn keys_are_normalized() {
        let store = SignatureStore::from_yaml(
            r"
images:
  nginx:
    signatures:
      - payload: cGF5bG9hZA==
        signature: c2ln
",
        )
        .expect("parse");
        let artifacts = store
            .lookup(&image("docker.io/library/nginx:latest"))
            .expect("entry");
        assert_eq!(artifacts.signatures.len(), 1);
        assert!(artifacts.attestations.is_empty());
    }

    #[test]
    fn equivalent_keys_are_merged() {
        let store = SignatureStore::from_yaml(
            r"
images:
  registry.example/app:v1:
    signatures:
      - { payload: YQ==, signature: Yg== }
  ' registry.example/app:v1':
    attestations:
      - { payload: Yw==, signature: ZA== }
",
        )
        .expect("parse");
        assert_eq!(store.len(), 1);
        let artifacts = store.lookup(&image("registry.example/app:v1")).expect("entry");
        assert_eq!(artifacts.signatures.len(), 1);
        assert_eq!(artifacts.attestations.len(), 1);
    }

    #[test]
    fn json_documents_are_accepted() {
        let store = SignatureStore::from_yaml(
            r#"{"images": {"ghcr.io/org/tool:v2": {"signatures": []}}}"#,
        )
        .expect("parse");
        assert!(store.lookup(&image("ghcr.io/org/tool:v2")).is_some());
        assert!(store.lookup(&image("ghcr.io/org/tool:v3")).is_none());
    }

    #[test]
    fn invalid_key_fails_load() {
        let err = SignatureStore::from_yaml("images:\n  'UPPER/Case:!!': {}\n").unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)), "got {err}");
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.yaml");
        let err = SignatureStore::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"), "got {err}");
    }

    #[test]
    fn empty_document_is_empty_store() {
        let store = SignatureStore::from_yaml("{}").expect("parse");
        assert!(store.is_empty());
    }
}
