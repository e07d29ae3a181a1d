//! 128-bit structural fingerprints: leading 16 bytes of a domain-prefixed SHA-1.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::str::FromStr;

const LATEX_DOMAIN: &[u8] = b"latex\0";
const SKELETON_DOMAIN: &[u8] = b"skeleton\0";
const CORPUS_DOMAIN: &[u8] = b"corpus\0";

/// Fixed-width digest of a canonical formula or of an operator-tree skeleton.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructuralHash([u8; 16]);

impl StructuralHash {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }

    /// Number of differing bits.
    pub fn hamming(&self, other: &StructuralHash) -> u32 {
        (self.as_u128() ^ other.as_u128()).count_ones()
    }

    /// Low 64 bits, used to seed per-query deterministic sampling.
    pub fn seed(&self) -> u64 {
        self.as_u128() as u64
    }
}

impl fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.as_u128())
    }
}

impl FromStr for StructuralHash {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16).map(|v| Self(v.to_be_bytes()))
    }
}

fn truncate(hasher: Sha1) -> StructuralHash {
    let out = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&out[..16]);
    StructuralHash(bytes)
}

fn digest(domain: &[u8], input: &str) -> StructuralHash {
    let mut hasher = Sha1::new();
    hasher.update(domain);
    hasher.update(input.as_bytes());
    truncate(hasher)
}

/// Fingerprint of a canonical LaTeX string.
pub fn hash_of(canonical: &str) -> StructuralHash {
    digest(LATEX_DOMAIN, canonical)
}

/// Fingerprint of an externally derived structural skeleton.
pub fn skeleton_hash_of(skeleton: &str) -> StructuralHash {
    digest(SKELETON_DOMAIN, skeleton)
}

/// Running fingerprint of an ordered `(id, canonical)` sequence. Every
/// persisted index part carries the digest of the records it was built from.
#[derive(Clone)]
pub struct CorpusDigest(Sha1);

impl CorpusDigest {
    pub fn new() -> Self {
        let mut hasher = Sha1::new();
        hasher.update(CORPUS_DOMAIN);
        Self(hasher)
    }

    pub fn update(&mut self, id: &str, canonical: &str) {
        for part in [id, canonical] {
            self.0.update((part.len() as u64).to_le_bytes());
            self.0.update(part.as_bytes());
        }
    }

    pub fn finish(self) -> StructuralHash {
        truncate(self.0)
    }
}

impl Default for CorpusDigest {
    fn default() -> Self {
        Self::new()
    }
}
