//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

mod harness;

pub use harness::{RecordedCall, TestNetwork, TestNode};
use meridian_common_types::{
    LedgerHash,
    LedgerValue,
    NodeId,
    NodeKeypair,
    NodeSeed,
    QuorumSet,
    QuorumSetMember,
    TxSetHash,
};
use meridian_consensus::ConsensusConfig;

pub const TEST_PASSPHRASE: &str = "meridian test net ; august 2024";

pub fn test_seed(n: u8) -> NodeSeed {
    NodeSeed::new([n; 32])
}

pub fn test_keypair(n: u8) -> NodeKeypair {
    NodeKeypair::from_seed(&test_seed(n))
}

pub fn test_node_id(n: u8) -> NodeId {
    test_keypair(n).node_id()
}

pub fn test_value(tag: u8) -> LedgerValue {
    LedgerValue::new(LedgerHash::zero(), TxSetHash::from([tag; 32]), 1_000)
}

/// A flat quorum set over the given test seeds.
pub fn flat_qset(threshold: u32, seeds: &[u8]) -> QuorumSet {
    QuorumSet::new(
        threshold,
        seeds.iter().map(|n| QuorumSetMember::Node(test_node_id(*n))).collect(),
    )
    .unwrap()
}

/// A config where every node in `seeds` shares the same flat quorum set.
pub fn shared_qset_config(seed: u8, threshold: u32, seeds: &[u8]) -> ConsensusConfig {
    ConsensusConfig::new(test_seed(seed), flat_qset(threshold, seeds), TEST_PASSPHRASE)
}
