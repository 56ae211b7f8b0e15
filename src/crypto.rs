//! Cryptographic primitives used by the store and the verifiers.
//!
//! SHA-256/SHA-512 content digests, base64 decoding for JWS envelopes and
//! ECDSA P-256 signature verification.

use anyhow::{anyhow, bail, Result};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL},
    Engine,
};
use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
use sha2::{Digest, Sha256, Sha512};

/// Computes SHA-256 of data and returns lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Computes SHA-512 of data and returns lowercase hex.
pub fn sha512_hex(data: &[u8]) -> String {
    format!("{:x}", Sha512::digest(data))
}

/// Decodes a standard (padded) base64 string.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| anyhow!("invalid base64: {e}"))
}

/// Decodes a base64url string as used by JWS. Trailing padding is tolerated.
pub fn decode_base64_url(encoded: &str) -> Result<Vec<u8>> {
    BASE64_URL
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| anyhow!("invalid base64url: {e}"))
}

/// Parses a P-256 public key from its SEC1 encoding (as found in an SPKI).
pub fn parse_public_key(sec1_bytes: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(sec1_bytes)
        .map_err(|_| anyhow!("public key is not a valid P-256 key"))
}

/// Parses an ECDSA signature from raw r||s format (JWS ES256).
pub fn parse_signature(raw_64_bytes: &[u8]) -> Result<Signature> {
    if raw_64_bytes.len() != 64 {
        bail!(
            "ES256 signature must be 64 bytes, got {}",
            raw_64_bytes.len()
        );
    }

    Signature::from_slice(raw_64_bytes).map_err(|_| anyhow!("malformed ES256 signature"))
}

/// Parses an ASN.1 DER encoded ECDSA signature (X.509 certificates).
pub fn parse_der_signature(der: &[u8]) -> Result<Signature> {
    Signature::from_der(der).map_err(|_| anyhow!("malformed DER ECDSA signature"))
}

/// Verifies an ECDSA P-256/SHA-256 signature over a message.
pub fn verify_signature(public_key: &VerifyingKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature).is_ok()
}
