//  Copyright 2024. The Meridian Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::path::Path;

use meridian_common_types::{NodeKeypair, NodeSeed, QuorumSet};
use meridian_consensus::ConsensusConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Could not read configuration: {0}")]
    Read(#[from] config::ConfigError),
    #[error("Invalid node seed: {0}")]
    Seed(#[from] meridian_common_types::keys::KeyError),
    #[error("Invalid consensus configuration: {0}")]
    Consensus(#[from] meridian_consensus::ConfigError),
}

/// On-disk node configuration. Every field can be overridden from the
/// environment with a `MERIDIAN_` prefix (e.g. `MERIDIAN_NODE_SEED`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex-encoded 256-bit seed deriving the node identity.
    pub node_seed: String,
    /// When false the node tracks consensus without voting.
    pub node_is_validator: bool,
    /// This node's quorum slices. Defaults to trusting only itself.
    pub quorum_set: Option<QuorumSet>,
    pub network_passphrase: String,
    /// Begin consensus at startup without waiting for peer traffic.
    pub force_scp: bool,
    pub min_close_interval_ms: u64,
    pub slot_window: u64,
    pub pending_statement_ttl_ms: u64,
    pub pending_per_key_cap: usize,
    pub pending_global_cap: usize,
    pub waiting_skip_on_v_blocking: bool,
    /// How many later decisions to keep a decided slot's statements for.
    pub decided_slot_retention: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_seed: String::new(),
            node_is_validator: true,
            quorum_set: None,
            network_passphrase: "meridian testnet ; may 2024".to_string(),
            force_scp: false,
            min_close_interval_ms: 2_000,
            slot_window: 1,
            pending_statement_ttl_ms: 60_000,
            pending_per_key_cap: 64,
            pending_global_cap: 1_024,
            waiting_skip_on_v_blocking: true,
            decided_slot_retention: 4,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApplicationConfig {
    pub node: NodeConfig,
}

impl ApplicationConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        let node = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("MERIDIAN"))
            .build()?
            .try_deserialize()?;
        Ok(Self { node })
    }

    /// Maps the file/env configuration onto the validated core config.
    /// Errors here are fatal at load time.
    pub fn to_consensus_config(&self) -> Result<ConsensusConfig, ConfigLoadError> {
        let seed = NodeSeed::from_hex(&self.node.node_seed)?;
        let quorum_set = match &self.node.quorum_set {
            Some(qset) => qset.clone(),
            None => QuorumSet::singleton(NodeKeypair::from_seed(&seed).node_id()),
        };
        let mut consensus = ConsensusConfig::new(seed, quorum_set, self.node.network_passphrase.clone());
        consensus.validating = self.node.node_is_validator;
        consensus.force_propose = self.node.force_scp;
        consensus.min_close_interval_ms = self.node.min_close_interval_ms;
        consensus.slot_window = self.node.slot_window;
        consensus.pending_statement_ttl_ms = self.node.pending_statement_ttl_ms;
        consensus.pending_per_key_cap = self.node.pending_per_key_cap;
        consensus.pending_global_cap = self.node.pending_global_cap;
        consensus.waiting_skip_on_v_blocking = self.node.waiting_skip_on_v_blocking;
        consensus.decided_slot_retention = self.node.decided_slot_retention;
        consensus.validate()?;
        Ok(consensus)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let file = write_config(&format!("{{\"node_seed\": \"{}\"}}", "ab".repeat(32)));
        let config = ApplicationConfig::load_from(file.path()).unwrap();
        assert!(config.node.node_is_validator);
        assert_eq!(config.node.slot_window, 1);

        let consensus = config.to_consensus_config().unwrap();
        assert!(consensus.validating);
        // With no quorum set configured the node trusts only itself
        assert_eq!(consensus.quorum_set.members().len(), 1);
    }

    #[test]
    fn explicit_quorum_set_is_used() {
        let member = "11".repeat(32);
        let file = write_config(&format!(
            "{{\"node_seed\": \"{}\", \"quorum_set\": {{\"threshold\": 1, \"members\": [\"{}\"]}}, \
             \"node_is_validator\": false}}",
            "ab".repeat(32),
            member
        ));
        let config = ApplicationConfig::load_from(file.path()).unwrap();
        let consensus = config.to_consensus_config().unwrap();
        assert!(!consensus.validating);
        assert_eq!(consensus.quorum_set.threshold(), 1);
    }

    #[test]
    fn bad_seed_is_fatal() {
        let file = write_config("{\"node_seed\": \"not hex\"}");
        let config = ApplicationConfig::load_from(file.path()).unwrap();
        assert!(matches!(config.to_consensus_config(), Err(ConfigLoadError::Seed(_))));
    }

    #[test]
    fn invalid_quorum_set_is_fatal() {
        let file = write_config(&format!(
            "{{\"node_seed\": \"{}\", \"quorum_set\": {{\"threshold\": 5, \"members\": [\"{}\"]}}}}",
            "ab".repeat(32),
            "11".repeat(32)
        ));
        let config = ApplicationConfig::load_from(file.path()).unwrap();
        assert!(matches!(
            config.to_consensus_config(),
            Err(ConfigLoadError::Consensus(_))
        ));
    }
}
