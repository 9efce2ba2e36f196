//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

use meridian_common_types::{quorum_set::QuorumSetError, NodeSeed, QuorumSet};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid quorum set: {0}")]
    QuorumSet(#[from] QuorumSetError),
    #[error("Network passphrase must not be empty")]
    EmptyNetworkPassphrase,
    #[error("Ballot timeout must be non-zero")]
    ZeroBallotTimeout,
    #[error("Pending statement caps must be non-zero")]
    ZeroPendingCap,
}

/// Consensus-core configuration. Validated once at load; an invalid quorum
/// set is fatal before the node joins the network, never after.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// Derives the node keypair and therefore this replica's NodeId.
    pub node_seed: NodeSeed,
    /// When false the replica tracks consensus but never originates
    /// statements.
    pub validating: bool,
    /// This replica's own quorum slices.
    pub quorum_set: QuorumSet,
    /// Mixed into the statement signature domain so statements cannot cross
    /// networks.
    pub network_passphrase: String,
    /// Begin consensus at startup without waiting for peer traffic.
    pub force_propose: bool,
    /// Lower bound on slot cadence; a slot stays in WAITING until this much
    /// time has passed since the previous close.
    pub min_close_interval_ms: u64,
    /// How many slots past the current one are accepted before statements
    /// are buffered as future-slot arrivals.
    pub slot_window: u64,
    /// Base ballot timeout. Effective timeout grows linearly with the
    /// ballot counter.
    pub ballot_timeout_ms: u64,
    pub pending_statement_ttl_ms: u64,
    pub pending_per_key_cap: usize,
    pub pending_global_cap: usize,
    /// A v-blocking set already working a slot overrides the WAITING
    /// throttle.
    pub waiting_skip_on_v_blocking: bool,
    /// Decided slots are kept around for this many later decisions before
    /// their statement stores are freed.
    pub decided_slot_retention: u64,
}

impl ConsensusConfig {
    pub fn new(node_seed: NodeSeed, quorum_set: QuorumSet, network_passphrase: impl Into<String>) -> Self {
        Self {
            node_seed,
            validating: true,
            quorum_set,
            network_passphrase: network_passphrase.into(),
            force_propose: false,
            min_close_interval_ms: 2_000,
            slot_window: 1,
            ballot_timeout_ms: 1_000,
            pending_statement_ttl_ms: 60_000,
            pending_per_key_cap: 64,
            pending_global_cap: 1_024,
            waiting_skip_on_v_blocking: true,
            decided_slot_retention: 4,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.quorum_set.validate()?;
        if self.network_passphrase.is_empty() {
            return Err(ConfigError::EmptyNetworkPassphrase);
        }
        if self.ballot_timeout_ms == 0 {
            return Err(ConfigError::ZeroBallotTimeout);
        }
        if self.pending_per_key_cap == 0 || self.pending_global_cap == 0 {
            return Err(ConfigError::ZeroPendingCap);
        }
        Ok(())
    }
}
