//! Canonical content hashing (stable hasher).
//!
//! Maps any channel, or any heterogeneous tuple of already-encoded fields, to
//! a 256-bit Blake2b digest. Used both as the lock-manager's key space and as
//! the structural basis of `Produce`/`Consume` references.

use blake2::digest::{consts::U32, Digest};
use blake2::Blake2b;

type Blake2b256 = Blake2b<U32>;

/// A 256-bit digest produced by the stable hasher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StableHash(pub [u8; 32]);

impl StableHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex_encode(&self.0)
    }

    /// Truncated hex, for log lines that must stay scannable.
    pub fn short_hex(&self) -> String {
        let full = self.to_hex();
        full[..16.min(full.len())].to_string()
    }
}

impl std::fmt::Display for StableHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).expect("writing into a String cannot fail");
    }
    s
}

/// Types with a canonical, encoding-stable byte representation, used both for
/// stable hashing of channels and for structural Produce/Consume references
/// over patterns, payloads and continuations.
pub trait CanonicalEncode {
    fn canonical_encode(&self) -> Vec<u8>;
}

impl CanonicalEncode for str {
    fn canonical_encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl CanonicalEncode for String {
    fn canonical_encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl CanonicalEncode for i64 {
    fn canonical_encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl CanonicalEncode for u64 {
    fn canonical_encode(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }
}

impl CanonicalEncode for bool {
    fn canonical_encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl CanonicalEncode for Vec<u8> {
    fn canonical_encode(&self) -> Vec<u8> {
        self.clone()
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Vec<T> {
    fn canonical_encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for item in self {
            let enc = item.canonical_encode();
            buf.extend_from_slice(&(enc.len() as u64).to_be_bytes());
            buf.extend_from_slice(&enc);
        }
        buf
    }
}

impl<T: CanonicalEncode> CanonicalEncode for Option<T> {
    fn canonical_encode(&self) -> Vec<u8> {
        match self {
            None => vec![0u8],
            Some(v) => {
                let mut buf = vec![1u8];
                buf.extend(v.canonical_encode());
                buf
            }
        }
    }
}

impl<T: CanonicalEncode> CanonicalEncode for &T {
    fn canonical_encode(&self) -> Vec<u8> {
        (*self).canonical_encode()
    }
}

/// Blake2b-256 of a single value's canonical encoding.
pub fn stable_hash(value: &impl CanonicalEncode) -> StableHash {
    let mut hasher = Blake2b256::new();
    hasher.update(value.canonical_encode());
    digest_to_hash(hasher)
}

/// Hashes a channel tuple as the ordered, length-prefixed concatenation of
/// each member's own stable hash. Order matters: `[a,b]` and `[b,a]` are
/// distinct lock keys and distinct map keys. The length prefix keeps `[a,b]`
/// distinct from a channel literally encoded as `ab`.
pub fn hash_channel_tuple<C: CanonicalEncode>(channels: &[C]) -> StableHash {
    let mut hasher = Blake2b256::new();
    for c in channels {
        let h = stable_hash(c);
        hasher.update((h.0.len() as u64).to_be_bytes());
        hasher.update(h.0);
    }
    digest_to_hash(hasher)
}

/// Structural hash over a sequence of independently-encoded fields, each
/// length-prefixed to avoid ambiguity at field boundaries. Used to build
/// Produce/Consume references from heterogeneous fields (channel, data,
/// persist flag, ...) without requiring a single combined encoding.
pub fn hash_fields(fields: &[&[u8]]) -> StableHash {
    let mut hasher = Blake2b256::new();
    for f in fields {
        hasher.update((f.len() as u64).to_be_bytes());
        hasher.update(f);
    }
    digest_to_hash(hasher)
}

fn digest_to_hash(hasher: Blake2b256) -> StableHash {
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    StableHash(out)
}
