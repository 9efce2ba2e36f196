//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Buffers statements whose prerequisites are missing and re-delivers them
//! when the prerequisites arrive.
//!
//! Statements live in one central arena keyed by a monotonically assigned
//! id; the per-reason maps hold ids only, so a statement pending on several
//! prerequisites has exactly one home. Resolving a prerequisite strips that
//! reason from each waiter and a waiter whose reason set drains is released
//! exactly once.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use log::*;
use meridian_common_types::{QuorumSetHash, SlotIndex, TxSetHash};

use crate::messages::SignedStatement;

const LOG_TARGET: &str = "meridian::consensus::pending";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PendingReason {
    AwaitingTxSet(TxSetHash),
    AwaitingQuorumSet(QuorumSetHash),
    AwaitingSlot(SlotIndex),
}

impl std::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingReason::AwaitingTxSet(hash) => write!(f, "awaiting tx set {}", hash),
            PendingReason::AwaitingQuorumSet(hash) => write!(f, "awaiting quorum set {}", hash),
            PendingReason::AwaitingSlot(index) => write!(f, "awaiting {}", index),
        }
    }
}

#[derive(Debug)]
struct Waiter {
    statement: SignedStatement,
    reasons: Vec<PendingReason>,
    parked_at_ms: u64,
}

#[derive(Debug)]
pub struct PendingPool {
    next_id: u64,
    // Insertion-ordered, so the front is always the oldest waiter
    arena: IndexMap<u64, Waiter>,
    by_tx_set: HashMap<TxSetHash, Vec<u64>>,
    by_quorum_set: HashMap<QuorumSetHash, Vec<u64>>,
    by_future_slot: BTreeMap<SlotIndex, Vec<u64>>,
    per_key_cap: usize,
    global_cap: usize,
    ttl_ms: u64,
}

impl PendingPool {
    pub fn new(per_key_cap: usize, global_cap: usize, ttl_ms: u64) -> Self {
        Self {
            next_id: 0,
            arena: IndexMap::new(),
            by_tx_set: HashMap::new(),
            by_quorum_set: HashMap::new(),
            by_future_slot: BTreeMap::new(),
            per_key_cap,
            global_cap,
            ttl_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Parks a statement under every missing prerequisite. Returns the number
    /// of older waiters evicted to make room.
    pub fn park(&mut self, statement: SignedStatement, reasons: Vec<PendingReason>, now_ms: u64) -> usize {
        debug_assert!(!reasons.is_empty(), "parking requires at least one reason");
        let mut evicted = 0usize;

        while self.arena.len() >= self.global_cap {
            self.evict_oldest();
            evicted += 1;
        }
        for reason in &reasons {
            while self.key_len(reason) >= self.per_key_cap {
                let oldest = self.oldest_for_key(reason).expect("non-empty key queue");
                self.remove_waiter(oldest);
                evicted += 1;
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        for reason in &reasons {
            match reason {
                PendingReason::AwaitingTxSet(hash) => self.by_tx_set.entry(*hash).or_default().push(id),
                PendingReason::AwaitingQuorumSet(hash) => self.by_quorum_set.entry(*hash).or_default().push(id),
                PendingReason::AwaitingSlot(index) => self.by_future_slot.entry(*index).or_default().push(id),
            }
        }
        trace!(target: LOG_TARGET, "Parked {} ({} reason(s))", statement, reasons.len());
        self.arena.insert(id, Waiter {
            statement,
            reasons,
            parked_at_ms: now_ms,
        });
        evicted
    }

    /// A transaction set became available; returns every statement that has
    /// no remaining prerequisite.
    pub fn resolve_tx_set(&mut self, hash: &TxSetHash) -> Vec<SignedStatement> {
        let ids = self.by_tx_set.remove(hash).unwrap_or_default();
        self.strip_reason(ids, &PendingReason::AwaitingTxSet(*hash))
    }

    /// A quorum set was resolved; returns every statement that has no
    /// remaining prerequisite.
    pub fn resolve_quorum_set(&mut self, hash: &QuorumSetHash) -> Vec<SignedStatement> {
        let ids = self.by_quorum_set.remove(hash).unwrap_or_default();
        self.strip_reason(ids, &PendingReason::AwaitingQuorumSet(*hash))
    }

    /// The slot horizon advanced: releases waiters for every slot index up to
    /// and including `through`.
    pub fn release_slots_through(&mut self, through: SlotIndex) -> Vec<SignedStatement> {
        let mut released = Vec::new();
        let keys: Vec<SlotIndex> = self
            .by_future_slot
            .range(..=through)
            .map(|(index, _)| *index)
            .collect();
        for key in keys {
            let ids = self.by_future_slot.remove(&key).unwrap_or_default();
            released.extend(self.strip_reason(ids, &PendingReason::AwaitingSlot(key)));
        }
        released
    }

    /// Drops waiters older than the pool TTL. Returns how many were dropped.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let expired: Vec<u64> = self
            .arena
            .iter()
            .filter(|(_, waiter)| now_ms.saturating_sub(waiter.parked_at_ms) >= self.ttl_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(waiter) = self.remove_waiter(*id) {
                debug!(target: LOG_TARGET, "Expired pending {}", waiter.statement);
            }
        }
        expired.len()
    }

    fn strip_reason(&mut self, ids: Vec<u64>, resolved: &PendingReason) -> Vec<SignedStatement> {
        let mut released = Vec::new();
        for id in ids {
            let Some(waiter) = self.arena.get_mut(&id) else {
                // Already evicted or released through another key
                continue;
            };
            waiter.reasons.retain(|reason| reason != resolved);
            if waiter.reasons.is_empty() {
                let waiter = self.arena.shift_remove(&id).expect("waiter just found");
                released.push(waiter.statement);
            }
        }
        released
    }

    fn key_len(&self, reason: &PendingReason) -> usize {
        match reason {
            PendingReason::AwaitingTxSet(hash) => self.by_tx_set.get(hash).map_or(0, Vec::len),
            PendingReason::AwaitingQuorumSet(hash) => self.by_quorum_set.get(hash).map_or(0, Vec::len),
            PendingReason::AwaitingSlot(index) => self.by_future_slot.get(index).map_or(0, Vec::len),
        }
    }

    fn oldest_for_key(&self, reason: &PendingReason) -> Option<u64> {
        let ids = match reason {
            PendingReason::AwaitingTxSet(hash) => self.by_tx_set.get(hash)?,
            PendingReason::AwaitingQuorumSet(hash) => self.by_quorum_set.get(hash)?,
            PendingReason::AwaitingSlot(index) => self.by_future_slot.get(index)?,
        };
        ids.first().copied()
    }

    fn evict_oldest(&mut self) {
        if let Some((&id, _)) = self.arena.first() {
            self.remove_waiter(id);
        }
    }

    fn remove_waiter(&mut self, id: u64) -> Option<Waiter> {
        let waiter = self.arena.shift_remove(&id)?;
        for reason in &waiter.reasons {
            match reason {
                PendingReason::AwaitingTxSet(hash) => {
                    if let Some(ids) = self.by_tx_set.get_mut(hash) {
                        ids.retain(|other| *other != id);
                        if ids.is_empty() {
                            self.by_tx_set.remove(hash);
                        }
                    }
                },
                PendingReason::AwaitingQuorumSet(hash) => {
                    if let Some(ids) = self.by_quorum_set.get_mut(hash) {
                        ids.retain(|other| *other != id);
                        if ids.is_empty() {
                            self.by_quorum_set.remove(hash);
                        }
                    }
                },
                PendingReason::AwaitingSlot(index) => {
                    if let Some(ids) = self.by_future_slot.get_mut(index) {
                        ids.retain(|other| *other != id);
                        if ids.is_empty() {
                            self.by_future_slot.remove(index);
                        }
                    }
                },
            }
        }
        Some(waiter)
    }
}

#[cfg(test)]
mod tests {
    use meridian_common_types::{
        Ballot,
        LedgerHash,
        LedgerValue,
        NodeKeypair,
        NodeSeed,
        QuorumSetHash,
        SlotIndex,
    };

    use super::*;
    use crate::messages::{signing_domain, PrepareExtras, Statement, StatementPayload};

    fn statement(node: u8, slot: u64) -> SignedStatement {
        let keypair = NodeKeypair::from_seed(&NodeSeed::new([node; 32]));
        let value = LedgerValue::new(LedgerHash::zero(), TxSetHash::from([node; 32]), 0);
        Statement {
            slot_index: SlotIndex(slot),
            from: keypair.node_id(),
            qset_hash: QuorumSetHash::from([node; 32]),
            ballot: Ballot::new(1, value.hash()),
            value,
            payload: StatementPayload::Prepare(PrepareExtras::default()),
        }
        .sign(&keypair, &signing_domain("test"))
    }

    fn pool() -> PendingPool {
        PendingPool::new(4, 8, 60_000)
    }

    #[test]
    fn single_reason_release() {
        let mut pool = pool();
        let hash = TxSetHash::from([1; 32]);
        pool.park(statement(1, 0), vec![PendingReason::AwaitingTxSet(hash)], 0);
        assert_eq!(pool.len(), 1);

        let released = pool.resolve_tx_set(&hash);
        assert_eq!(released.len(), 1);
        assert!(pool.is_empty());
        // Duplicate resolution releases nothing
        assert!(pool.resolve_tx_set(&hash).is_empty());
    }

    #[test]
    fn multi_reason_release_is_exactly_once() {
        let mut pool = pool();
        let tx_hash = TxSetHash::from([1; 32]);
        let qset_hash = QuorumSetHash::from([2; 32]);
        pool.park(
            statement(1, 5),
            vec![
                PendingReason::AwaitingTxSet(tx_hash),
                PendingReason::AwaitingQuorumSet(qset_hash),
            ],
            0,
        );

        // First prerequisite alone keeps the statement parked
        assert!(pool.resolve_tx_set(&tx_hash).is_empty());
        assert_eq!(pool.len(), 1);

        let released = pool.resolve_quorum_set(&qset_hash);
        assert_eq!(released.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn future_slot_release_is_ordered_by_horizon() {
        let mut pool = pool();
        pool.park(statement(1, 3), vec![PendingReason::AwaitingSlot(SlotIndex(3))], 0);
        pool.park(statement(2, 5), vec![PendingReason::AwaitingSlot(SlotIndex(5))], 0);

        let released = pool.release_slots_through(SlotIndex(4));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].statement.slot_index, SlotIndex(3));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn global_cap_evicts_oldest() {
        let mut pool = PendingPool::new(16, 2, 60_000);
        let hash = |n: u8| TxSetHash::from([n; 32]);
        pool.park(statement(1, 0), vec![PendingReason::AwaitingTxSet(hash(1))], 0);
        pool.park(statement(2, 0), vec![PendingReason::AwaitingTxSet(hash(2))], 0);
        let evicted = pool.park(statement(3, 0), vec![PendingReason::AwaitingTxSet(hash(3))], 0);
        assert_eq!(evicted, 1);
        assert_eq!(pool.len(), 2);
        // The oldest waiter is gone along with its index entry
        assert!(pool.resolve_tx_set(&hash(1)).is_empty());
        assert_eq!(pool.resolve_tx_set(&hash(2)).len(), 1);
    }

    #[test]
    fn per_key_cap_evicts_within_key() {
        let mut pool = PendingPool::new(2, 16, 60_000);
        let hash = TxSetHash::from([1; 32]);
        for node in 1..=3u8 {
            pool.park(statement(node, 0), vec![PendingReason::AwaitingTxSet(hash)], 0);
        }
        assert_eq!(pool.len(), 2);
        let released = pool.resolve_tx_set(&hash);
        assert_eq!(released.len(), 2);
    }

    #[test]
    fn expiry_drops_old_waiters() {
        let mut pool = pool();
        let hash = TxSetHash::from([1; 32]);
        pool.park(statement(1, 0), vec![PendingReason::AwaitingTxSet(hash)], 0);
        pool.park(statement(2, 0), vec![PendingReason::AwaitingTxSet(hash)], 50_000);

        assert_eq!(pool.expire(60_000), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.resolve_tx_set(&hash).len(), 1);
    }
}
