//! ECDSA P-256 public keys and PEM helpers.

use aws_lc_rs::signature::{ECDSA_P256_SHA256_ASN1, UnparsedPublicKey};
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Fixed DER header of a P-256 `SubjectPublicKeyInfo`:
/// ```text
/// SEQUENCE {
///   SEQUENCE {
///     OID 1.2.840.10045.2.1  (id-ecPublicKey)
///     OID 1.2.840.10045.3.1.7 (prime256v1)
///   }
///   BIT STRING <public key>
/// }
/// ```
#[rustfmt::skip]
const P256_SPKI_HEADER: [u8; 26] = [
    0x30, 0x59,
    0x30, 0x13,
    0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01,
    0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07,
    0x03, 0x42, 0x00,
];

/// Length of an uncompressed P-256 point.
const P256_POINT_LEN: usize = 65;

/// An ECDSA P-256 verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    point: Vec<u8>,
}

impl PublicKey {
    /// Parse a PEM-encoded P-256 SPKI public key.
    pub fn from_pem(pem: &str) -> Result<Self, StoreError> {
        let der = pem_to_der(pem)
            .ok_or_else(|| StoreError::InvalidKey("not a PEM block".to_owned()))?;
        let point = der
            .strip_prefix(&P256_SPKI_HEADER[..])
            .ok_or_else(|| StoreError::InvalidKey("not a P-256 SPKI key".to_owned()))?;
        if point.len() != P256_POINT_LEN || point[0] != 0x04 {
            return Err(StoreError::InvalidKey(
                "expected an uncompressed P-256 point".to_owned(),
            ));
        }
        Ok(Self {
            point: point.to_vec(),
        })
    }

    /// Verify an ASN.1 DER ECDSA signature over `payload`.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), StoreError> {
        if signature.is_empty() {
            return Err(StoreError::InvalidSignature("empty signature".to_owned()));
        }
        UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, &self.point)
            .verify(payload, signature)
            .map_err(|e| StoreError::InvalidSignature(format!("ECDSA verification failed: {e}")))
    }
}

// ── Encoding helpers ─────────────────────────────────────────────────

/// Wrap DER bytes in PEM with the given label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    use std::fmt::Write;

    let b64 = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    let mut rest = b64.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(64));
        pem.push_str(line);
        pem.push('\n');
        rest = tail;
    }
    let _ = writeln!(pem, "-----END {label}-----");
    pem
}

/// Extract the DER bytes of the first PEM block in `pem`.
pub fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    let mut b64 = String::new();
    let mut in_body = false;

    for line in pem.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("-----BEGIN ") {
            in_body = true;
            continue;
        }
        if trimmed.starts_with("-----END ") {
            break;
        }
        if in_body {
            b64.push_str(trimmed);
        }
    }

    if !in_body || b64.is_empty() {
        return None;
    }
    base64::engine::general_purpose::STANDARD.decode(&b64).ok()
}

/// Encode an uncompressed P-256 point as SPKI DER.
pub fn encode_p256_spki(point: &[u8]) -> Vec<u8> {
    let mut spki = Vec::with_capacity(P256_SPKI_HEADER.len() + point.len());
    spki.extend_from_slice(&P256_SPKI_HEADER);
    spki.extend_from_slice(point);
    spki
}

/// Decode standard base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

/// SHA-256 hex digest of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
