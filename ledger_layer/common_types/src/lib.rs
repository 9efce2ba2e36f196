//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

pub mod ballot;
pub mod hashing;
pub mod keys;
pub mod quorum_set;
pub mod serde_with;
pub mod value;

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

pub use crate::{
    ballot::Ballot,
    keys::{NodeKeypair, NodeSeed, NodeSignature},
    quorum_set::{QuorumSet, QuorumSetMember},
    value::LedgerValue,
};

#[derive(Debug, thiserror::Error)]
#[error("Invalid size for fixed hash: expected 32 bytes, got {size}")]
pub struct FixedHashSizeError {
    pub size: usize,
}

/// 32-byte digest used for every content-addressed identity in the system.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FixedHash(#[serde(with = "serde_with::hex")] [u8; 32]);

impl FixedHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub const fn into_array(self) -> [u8; 32] {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub const fn byte_size() -> usize {
        32
    }
}

impl From<[u8; 32]> for FixedHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for FixedHash {
    type Error = FixedHashSizeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = value.try_into().map_err(|_| FixedHashSizeError { size: value.len() })?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for FixedHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for FixedHash {
    type Err = FixedHashSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| FixedHashSizeError { size: 0 })?;
        Self::try_from(bytes.as_slice())
    }
}

impl Display for FixedHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FixedHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixedHash({})", self)
    }
}

/// Public-key identity of a consensus participant. Ordering is
/// byte-lexicographic over the raw key.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(#[serde(with = "serde_with::hex")] [u8; 32]);

impl NodeId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn into_array(self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for NodeId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for NodeId {
    type Error = FixedHashSizeError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = value.try_into().map_err(|_| FixedHashSizeError { size: value.len() })?;
        Ok(Self(bytes))
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // Eight bytes is plenty to tell validators apart in a log line
        for b in &self.0[..8] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// A numbered consensus decision instance. One slot per ledger close.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SlotIndex(pub u64);

impl SlotIndex {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn saturating_sub(self, other: SlotIndex) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl From<u64> for SlotIndex {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Display for SlotIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

macro_rules! typed_hash {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(
            Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(FixedHash);

        impl $name {
            pub const fn new(hash: FixedHash) -> Self {
                Self(hash)
            }

            pub const fn zero() -> Self {
                Self(FixedHash::zero())
            }

            pub const fn hash(&self) -> &FixedHash {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_slice()
            }

            pub const fn into_array(self) -> [u8; 32] {
                self.0.into_array()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(FixedHash::new(bytes))
            }
        }

        impl From<FixedHash> for $name {
            fn from(hash: FixedHash) -> Self {
                Self(hash)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = FixedHashSizeError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                FixedHash::try_from(value).map(Self)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }
    };
}

typed_hash!(
    /// Digest of a candidate value (see [`value::LedgerValue`]).
    ValueHash
);
typed_hash!(
    /// Digest identifying a proposed transaction set.
    TxSetHash
);
typed_hash!(
    /// Canonical-serialization digest of a quorum set, its stable identity.
    QuorumSetHash
);
typed_hash!(
    /// Hash of a closed ledger header.
    LedgerHash
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_hash_hex_round_trip() {
        let hash = FixedHash::new([0xab; 32]);
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        assert_eq!(FixedHash::from_str(&s).unwrap(), hash);
    }

    #[test]
    fn fixed_hash_rejects_wrong_size() {
        let err = FixedHash::try_from(&[1u8; 16][..]).unwrap_err();
        assert_eq!(err.size, 16);
    }

    #[test]
    fn node_id_orders_byte_lexicographically() {
        let a = NodeId::new([1u8; 32]);
        let mut hi = [1u8; 32];
        hi[31] = 2;
        let b = NodeId::new(hi);
        assert!(a < b);
    }

    #[test]
    fn typed_hashes_serialize_as_hex() {
        let hash = ValueHash::from([0x11; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "11".repeat(32)));
        let back: ValueHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
