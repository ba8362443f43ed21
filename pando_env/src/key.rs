//! Composite entry keys.
//!
//! A key is the triple `(domain, b, c)`. The domain packs a 32-bit namespace
//! id and two 16-bit subtype fields into a single `u64`:
//!
//! ```text
//!  63                    32 31        16 15         0
//! ┌────────────────────────┬────────────┬────────────┐
//! │       namespace        │    kind    │  subkind   │
//! └────────────────────────┴────────────┴────────────┘
//! ```
//!
//! Bit 63 doubles as the "random key" marker: domains with the top bit set
//! belong to entries inserted through the sentinel key and are never looked
//! up by key.

use serde::{Deserialize, Serialize};

/// Top bit of a domain, set on every random (sentinel-resolved) key.
pub const RANDOM_DOMAIN_BIT: u64 = 1 << 63;

/// Packed `(namespace, kind, subkind)` domain of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainInfo(pub u64);

impl ChainInfo {
    /// Packs a namespace and two subtype fields.
    pub const fn pack(namespace: u32, kind: u16, subkind: u16) -> Self {
        let mut raw = namespace as u64;
        raw = (raw << 16) | kind as u64;
        raw = (raw << 16) | subkind as u64;
        Self(raw)
    }

    /// Splits the domain back into `(namespace, kind, subkind)`.
    pub const fn unpack(self) -> (u32, u16, u16) {
        let namespace = ((self.0 & 0xFFFF_FFFF_0000_0000) >> 32) as u32;
        let kind = ((self.0 & 0xFFFF_0000) >> 16) as u16;
        let subkind = (self.0 & 0xFFFF) as u16;
        (namespace, kind, subkind)
    }

    pub const fn namespace(self) -> u32 {
        self.unpack().0
    }

    pub const fn kind(self) -> u16 {
        self.unpack().1
    }

    pub const fn subkind(self) -> u16 {
        self.unpack().2
    }

    /// Returns true if the random-key marker bit is set.
    pub const fn is_random(self) -> bool {
        (self.0 >> 63) & 1 == 1
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ChainInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (ns, kind, sub) = self.unpack();
        write!(f, "{}.{}.{}", ns, kind, sub)
    }
}

/// Key of a stored entry.
///
/// Ordering is lexicographic on `(domain, b, c)`, which the derived `Ord`
/// provides through field declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub domain: ChainInfo,
    pub b: i64,
    pub c: i64,
}

impl Key {
    /// The "no key" sentinel: insert without caring about collisions.
    pub const SENTINEL: Key = Key {
        domain: ChainInfo(RANDOM_DOMAIN_BIT),
        b: -1,
        c: -1,
    };

    pub const fn new(domain: ChainInfo, b: i64, c: i64) -> Self {
        Self { domain, b, c }
    }

    /// True only for the exact sentinel value.
    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    /// True for the sentinel and for every key it was resolved into.
    pub fn is_random(&self) -> bool {
        self.domain.is_random()
    }

    /// Builds a random key from raw entropy, forcing the marker bit.
    pub fn random_from(domain_bits: u64, b: i64, c: i64) -> Self {
        Self {
            domain: ChainInfo(RANDOM_DOMAIN_BIT | domain_bits),
            b,
            c,
        }
    }

    /// Big-endian byte encoding whose byte order matches key order.
    ///
    /// The signed halves are offset by flipping their sign bit so that
    /// negative ids sort before positive ones.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[0..8].copy_from_slice(&self.domain.0.to_be_bytes());
        out[8..16].copy_from_slice(&((self.b as u64) ^ (1 << 63)).to_be_bytes());
        out[16..24].copy_from_slice(&((self.c as u64) ^ (1 << 63)).to_be_bytes());
        out
    }

    /// Inverse of [`Key::to_bytes`]. Returns `None` on a length mismatch.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 24 {
            return None;
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[0..8]);
        let domain = u64::from_be_bytes(word);
        word.copy_from_slice(&bytes[8..16]);
        let b = (u64::from_be_bytes(word) ^ (1 << 63)) as i64;
        word.copy_from_slice(&bytes[16..24]);
        let c = (u64::from_be_bytes(word) ^ (1 << 63)) as i64;
        Some(Self::new(ChainInfo(domain), b, c))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.domain, self.b, self.c)
    }
}
