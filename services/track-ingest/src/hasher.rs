//!
//! src/hasher.rs  Oct 18th, 2026
//!
//! Derives the dedup key (sha-256) and the secondary md5 digest from a
//! raw chromaprint fingerprint
//!

use md5::Md5;
use sha2::{Digest, Sha256};

use crate::types::DedupKey;

pub fn dedup_key(raw_fingerprint: &str) -> DedupKey {
    let digest = Sha256::digest(raw_fingerprint.as_bytes());
    DedupKey(format!("{digest:x}"))
}

/// Kept for compatibility with consumers that still index on md5
pub fn md5_digest(raw_fingerprint: &str) -> String {
    let digest = Md5::digest(raw_fingerprint.as_bytes());
    format!("{digest:x}")
}
