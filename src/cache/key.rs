//! Stable fingerprint key construction for the query cache.

use sha2::{Digest, Sha256};

/// The three independent cache namespaces, so a vector query's key can
/// never collide with a text or hybrid query's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Vector,
    Text,
    Hybrid,
}

impl Channel {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Vector => "vec:",
            Self::Text => "text:",
            Self::Hybrid => "hybrid:",
        }
    }
}

/// Builds a cache key from the query's shape: the vector's little-endian
/// f32 bit pattern, the UTF-8 text, and the integer parameters `k` and
/// `ef`. The hash is truncated to 128 bits (32 hex chars) after the
/// channel prefix, per the cache key format.
#[must_use]
pub fn cache_key(channel: Channel, vector: Option<&[f32]>, text: Option<&str>, k: usize, ef: usize) -> String {
    let mut hasher = Sha256::new();
    if let Some(v) = vector {
        for x in v {
            hasher.update(x.to_le_bytes());
        }
    }
    if let Some(t) = text {
        hasher.update(t.as_bytes());
    }
    hasher.update(u64::try_from(k).unwrap_or(u64::MAX).to_le_bytes());
    hasher.update(u64::try_from(ef).unwrap_or(u64::MAX).to_le_bytes());

    let digest = hasher.finalize();
    let truncated = &digest[..16]; // 128 bits
    format!("{}{}", channel.prefix(), hex::encode(truncated))
}
