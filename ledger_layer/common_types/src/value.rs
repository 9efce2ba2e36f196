//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    hashing::{ConsensusHasher, VALUE_DOMAIN},
    FixedHashSizeError,
    LedgerHash,
    TxSetHash,
    ValueHash,
};

/// The content a slot decides on: which transaction set closes the ledger
/// that follows `previous_ledger`, and when. The consensus core only ever
/// hashes and compares values; their meaning belongs to the ledger pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerValue {
    pub previous_ledger: LedgerHash,
    pub tx_set_hash: TxSetHash,
    pub close_time_ms: u64,
}

impl LedgerValue {
    pub const ENCODED_LEN: usize = 32 + 32 + 8;

    pub fn new(previous_ledger: LedgerHash, tx_set_hash: TxSetHash, close_time_ms: u64) -> Self {
        Self {
            previous_ledger,
            tx_set_hash,
            close_time_ms,
        }
    }

    /// Canonical length-stable encoding, the byte string that [`Self::hash`]
    /// and the statement wire format commit to.
    pub fn canonical_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..32].copy_from_slice(self.previous_ledger.as_bytes());
        out[32..64].copy_from_slice(self.tx_set_hash.as_bytes());
        out[64..].copy_from_slice(&self.close_time_ms.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FixedHashSizeError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(FixedHashSizeError { size: bytes.len() });
        }
        let previous_ledger = LedgerHash::try_from(&bytes[..32])?;
        let tx_set_hash = TxSetHash::try_from(&bytes[32..64])?;
        let close_time_ms = u64::from_be_bytes(bytes[64..].try_into().expect("length checked"));
        Ok(Self {
            previous_ledger,
            tx_set_hash,
            close_time_ms,
        })
    }

    pub fn hash(&self) -> ValueHash {
        ConsensusHasher::new(VALUE_DOMAIN)
            .chain(&self.canonical_bytes())
            .finalize()
            .into()
    }
}

impl Display for LedgerValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[prev {}, txs {}, close {}]",
            &self.previous_ledger.to_string()[..8],
            &self.tx_set_hash.to_string()[..8],
            self.close_time_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value() -> LedgerValue {
        LedgerValue::new(LedgerHash::from([1; 32]), TxSetHash::from([2; 32]), 12_345)
    }

    #[test]
    fn canonical_round_trip() {
        let v = value();
        let decoded = LedgerValue::decode(&v.canonical_bytes()).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(LedgerValue::decode(&[0u8; 16]).is_err());
    }

    #[test]
    fn hash_tracks_content() {
        let a = value();
        let mut b = a;
        b.close_time_ms += 1;
        assert_eq!(a.hash(), value().hash());
        assert_ne!(a.hash(), b.hash());
    }
}
