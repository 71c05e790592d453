//! Cryptographic hashing utilities
//!
//! Provides SHA-256 based hashing used for proposal identifiers,
//! signing digests, and address material.

use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes double SHA-256 hash (SHA-256 of SHA-256)
/// Used for Base58Check checksums and transaction identifiers
pub fn double_sha256(data: &[u8]) -> Vec<u8> {
    sha256(&sha256(data))
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Computes double SHA-256 hash and returns it as a hex string
pub fn double_sha256_hex(data: &[u8]) -> String {
    hex::encode(double_sha256(data))
}
