//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Quorum algebra: the two trust predicates every slot transition consults.
//!
//! Both are pure functions of one node's quorum-set tree and a set of node
//! ids. Whether the *members* of that set are themselves trustworthy is the
//! operator's quorum-configuration problem, not a question this module can
//! answer.

use std::{
    collections::{BTreeSet, HashMap},
    hash::{Hash, Hasher},
};

use meridian_common_types::{NodeId, QuorumSet, QuorumSetHash, QuorumSetMember};

/// True iff `nodes` satisfies the recursive threshold predicate of `qset`:
/// for each level, at least `threshold` members are present in `nodes` or
/// are nested sets that recursively pass.
pub fn is_quorum_slice(qset: &QuorumSet, nodes: &BTreeSet<NodeId>) -> bool {
    let mut satisfied = 0u32;
    for member in qset.members() {
        let hit = match member {
            QuorumSetMember::Node(id) => nodes.contains(id),
            QuorumSetMember::Inner(inner) => is_quorum_slice(inner, nodes),
        };
        if hit {
            satisfied += 1;
            if satisfied >= qset.threshold() {
                return true;
            }
        }
    }
    false
}

/// True iff `nodes` intersects every quorum slice of `qset`'s owner: with
/// `k = |members| - threshold + 1`, at least `k` members are in `nodes` or
/// have their nested set v-blocked by `nodes`.
pub fn is_v_blocking(qset: &QuorumSet, nodes: &BTreeSet<NodeId>) -> bool {
    let needed = qset.members().len() as u32 - qset.threshold() + 1;
    let mut blocked = 0u32;
    for member in qset.members() {
        let hit = match member {
            QuorumSetMember::Node(id) => nodes.contains(id),
            QuorumSetMember::Inner(inner) => is_v_blocking(inner, nodes),
        };
        if hit {
            blocked += 1;
            if blocked >= needed {
                return true;
            }
        }
    }
    false
}

/// True iff `nodes` is a quorum from `perspective`'s point of view: the
/// perspective node itself is in the set and its threshold predicate holds.
pub fn is_quorum(qset: &QuorumSet, perspective: &NodeId, nodes: &BTreeSet<NodeId>) -> bool {
    nodes.contains(perspective) && is_quorum_slice(qset, nodes)
}

/// Memoizes the two predicates on `(quorum-set hash, node-set digest)`.
/// Slot transitions re-evaluate the same sets every time a statement
/// arrives; the cache makes the hot path a lookup.
#[derive(Debug, Default)]
pub struct QuorumCache {
    quorum_slice: HashMap<(QuorumSetHash, u64), bool>,
    v_blocking: HashMap<(QuorumSetHash, u64), bool>,
}

impl QuorumCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_quorum(
        &mut self,
        qset: &QuorumSet,
        qset_hash: QuorumSetHash,
        perspective: &NodeId,
        nodes: &BTreeSet<NodeId>,
    ) -> bool {
        if !nodes.contains(perspective) {
            return false;
        }
        let key = (qset_hash, node_set_digest(nodes));
        *self
            .quorum_slice
            .entry(key)
            .or_insert_with(|| is_quorum_slice(qset, nodes))
    }

    pub fn is_v_blocking(&mut self, qset: &QuorumSet, qset_hash: QuorumSetHash, nodes: &BTreeSet<NodeId>) -> bool {
        let key = (qset_hash, node_set_digest(nodes));
        *self.v_blocking.entry(key).or_insert_with(|| is_v_blocking(qset, nodes))
    }

    /// Entries are only valid within one slot's lifetime of statement
    /// arrivals; the orchestrator clears between slots.
    pub fn clear(&mut self) {
        self.quorum_slice.clear();
        self.v_blocking.clear();
    }
}

fn node_set_digest(nodes: &BTreeSet<NodeId>) -> u64 {
    // BTreeSet iterates in sorted order, so equal sets digest equally
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for id in nodes {
        id.hash(&mut hasher);
    }
    hasher.finish()
}
