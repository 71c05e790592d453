//! Cryptographic utilities for the wallet service
//!
//! This module provides:
//! - SHA-256 hashing
//! - ECDSA key management (secp256k1)
//! - Base58Check shared-address material

pub mod hash;
pub mod keys;

pub use hash::{double_sha256, double_sha256_hex, sha256, sha256_hex};
pub use keys::{
    public_key_from_hex, script_address, sign_message, verify_signature, KeyError, KeyPair,
};
