//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Registry of every peer seen this round and the quorum set each one
//! advertises. Quorum sets travel by hash; the registry is where a hash
//! becomes a resolved tree once the overlay delivers it.

use std::{collections::HashMap, sync::Arc};

use log::*;
use meridian_common_types::{NodeId, QuorumSet, QuorumSetHash};

const LOG_TARGET: &str = "meridian::consensus::node_registry";

#[derive(Clone, Debug)]
pub struct PeerNode {
    pub id: NodeId,
    pub qset_hash: QuorumSetHash,
    qset: Option<Arc<QuorumSet>>,
}

impl PeerNode {
    pub fn quorum_set(&self) -> Option<&Arc<QuorumSet>> {
        self.qset.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.qset.is_some()
    }
}

#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, PeerNode>,
    resolved: HashMap<QuorumSetHash, Arc<QuorumSet>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `id` advertises quorum set `qset_hash`. Creates the node
    /// on first sight; re-keys it if the advertised hash changed.
    pub fn observe(&mut self, id: NodeId, qset_hash: QuorumSetHash) -> &PeerNode {
        let entry = self.nodes.entry(id).or_insert_with(|| PeerNode {
            id,
            qset_hash,
            qset: None,
        });
        if entry.qset_hash != qset_hash {
            debug!(
                target: LOG_TARGET,
                "Node {} switched quorum set {} -> {}", id, entry.qset_hash, qset_hash
            );
            entry.qset_hash = qset_hash;
            entry.qset = None;
        }
        if entry.qset.is_none() {
            entry.qset = self.resolved.get(&qset_hash).cloned();
        }
        entry
    }

    /// Stores a resolved quorum set and attaches it to every node advertising
    /// its hash. Returns false if the set was already known.
    pub fn bind_quorum_set(&mut self, qset: QuorumSet) -> bool {
        let hash = qset.hash();
        if self.resolved.contains_key(&hash) {
            return false;
        }
        let qset = Arc::new(qset);
        self.resolved.insert(hash, qset.clone());
        let mut attached = 0usize;
        for node in self.nodes.values_mut() {
            if node.qset_hash == hash && node.qset.is_none() {
                node.qset = Some(qset.clone());
                attached += 1;
            }
        }
        debug!(
            target: LOG_TARGET,
            "Resolved quorum set {} ({} node(s) attached)", hash, attached
        );
        true
    }

    pub fn get(&self, id: &NodeId) -> Option<&PeerNode> {
        self.nodes.get(id)
    }

    pub fn quorum_set_of(&self, id: &NodeId) -> Option<Arc<QuorumSet>> {
        self.nodes.get(id).and_then(|node| node.qset.clone())
    }

    pub fn is_resolved(&self, hash: &QuorumSetHash) -> bool {
        self.resolved.contains_key(hash)
    }

    pub fn resolved(&self, hash: &QuorumSetHash) -> Option<&Arc<QuorumSet>> {
        self.resolved.get(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
