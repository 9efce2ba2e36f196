//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Domain-separated SHA-256 hashing.
//!
//! Every digest in the protocol is produced through [`ConsensusHasher`] so
//! that hashes of different structures can never collide with each other.

use sha2::{Digest, Sha256};

use crate::FixedHash;

pub const VALUE_DOMAIN: &str = "meridian.value.v1";
pub const QUORUM_SET_DOMAIN: &str = "meridian.quorum_set.v1";
pub const TX_SET_DOMAIN: &str = "meridian.tx_set.v1";
pub const STATEMENT_SIGNATURE_DOMAIN: &str = "meridian.statement.v1";

pub struct ConsensusHasher {
    inner: Sha256,
}

impl ConsensusHasher {
    pub fn new(domain: &str) -> Self {
        let mut inner = Sha256::new();
        inner.update((domain.len() as u64).to_be_bytes());
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn chain(mut self, bytes: &[u8]) -> Self {
        self.update(bytes);
        self
    }

    pub fn finalize(self) -> FixedHash {
        let digest: [u8; 32] = self.inner.finalize().into();
        FixedHash::new(digest)
    }
}

/// Signature domain for statements, binding signatures to one network.
/// Nodes configured with different passphrases cannot replay each other's
/// statements.
pub fn statement_signing_domain(network_passphrase: &str) -> FixedHash {
    ConsensusHasher::new(STATEMENT_SIGNATURE_DOMAIN)
        .chain(network_passphrase.as_bytes())
        .finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domains_separate() {
        let a = ConsensusHasher::new(VALUE_DOMAIN).chain(b"payload").finalize();
        let b = ConsensusHasher::new(QUORUM_SET_DOMAIN).chain(b"payload").finalize();
        assert_ne!(a, b);
    }

    #[test]
    fn hashing_is_stable() {
        let a = ConsensusHasher::new(VALUE_DOMAIN).chain(b"payload").finalize();
        let b = ConsensusHasher::new(VALUE_DOMAIN).chain(b"payload").finalize();
        assert_eq!(a, b);
    }

    #[test]
    fn passphrase_changes_signing_domain() {
        assert_ne!(
            statement_signing_domain("meridian mainnet"),
            statement_signing_domain("meridian testnet"),
        );
    }
}
