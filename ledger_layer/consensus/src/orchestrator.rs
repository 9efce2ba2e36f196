//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The consensus orchestrator: single entry point for everything inbound,
//! owner of the active slots, and the component that interlocks consensus
//! with the ledger-close pipeline.
//!
//! The orchestrator is strictly synchronous and single-owner. Effects
//! (broadcasts, externalized decisions, fetch requests) accumulate in an
//! [`Outbox`] the caller drains after each entry point returns; nothing here
//! blocks, locks, or re-enters.

use std::collections::{btree_map::Entry, BTreeMap, HashSet};

use log::*;
use meridian_common_types::{LedgerValue, NodeId, NodeKeypair, QuorumSet, QuorumSetHash, SlotIndex, TxSetHash};

use crate::{
    config::{ConfigError, ConsensusConfig},
    error::ConsensusError,
    messages::SignedStatement,
    node_registry::NodeRegistry,
    pending::{PendingPool, PendingReason},
    quorum::QuorumCache,
    signer::LocalSigner,
    slot::{Slot, SlotAction, SlotContext, SlotPhase},
    statement_store::InsertOutcome,
};

const LOG_TARGET: &str = "meridian::consensus::orchestrator";

/// Drop and traffic counters. `receive_statement` never reports protocol
/// problems to its caller; it logs and counts them here.
#[derive(Copy, Clone, Debug, Default)]
pub struct OrchestratorStats {
    pub received: u64,
    pub bad_signature: u64,
    pub stale: u64,
    pub parked: u64,
    pub released: u64,
    pub dropped_past_slot: u64,
    pub pending_evicted: u64,
    pub pending_expired: u64,
}

/// A decided slot, delivered to the ledger-close engine in slot order.
#[derive(Clone, Debug)]
pub struct ExternalizedValue {
    pub slot_index: SlotIndex,
    pub value: LedgerValue,
    /// The recorded EXTERNALIZE statements backing the decision.
    pub proof: Vec<SignedStatement>,
}

/// Side effects accumulated during one entry-point call.
#[derive(Debug, Default)]
pub struct Outbox {
    pub broadcasts: Vec<SignedStatement>,
    pub externalized: Vec<ExternalizedValue>,
    /// Transaction sets the overlay should fetch.
    pub missing_tx_sets: Vec<TxSetHash>,
    /// Quorum sets the overlay should fetch.
    pub missing_quorum_sets: Vec<QuorumSetHash>,
}

impl Outbox {
    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty()
            && self.externalized.is_empty()
            && self.missing_tx_sets.is_empty()
            && self.missing_quorum_sets.is_empty()
    }
}

#[derive(Debug)]
pub struct ConsensusOrchestrator {
    config: ConsensusConfig,
    signer: LocalSigner,
    registry: NodeRegistry,
    cache: QuorumCache,
    pending: PendingPool,
    known_tx_sets: HashSet<TxSetHash>,
    slots: BTreeMap<u64, Slot>,
    current_slot: SlotIndex,
    /// The next slot index owed to the ledger-close engine.
    next_externalize: SlotIndex,
    /// Decided but not yet deliverable because an earlier slot is still open.
    undelivered: BTreeMap<u64, ExternalizedValue>,
    last_close_ms: Option<u64>,
    outbox: Outbox,
    stats: OrchestratorStats,
}

impl ConsensusOrchestrator {
    pub fn new(config: ConsensusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keypair = NodeKeypair::from_seed(&config.node_seed);
        let qset_hash = config.quorum_set.hash();
        let signer = LocalSigner::new(keypair, qset_hash, config.validating, &config.network_passphrase);

        let mut registry = NodeRegistry::new();
        registry.observe(signer.node_id(), qset_hash);
        registry.bind_quorum_set(config.quorum_set.clone());

        let pending = PendingPool::new(
            config.pending_per_key_cap,
            config.pending_global_cap,
            config.pending_statement_ttl_ms,
        );
        info!(
            target: LOG_TARGET,
            "🚀 Consensus core for node {} (validating: {}, quorum set {})",
            signer.node_id(),
            config.validating,
            config.quorum_set
        );
        Ok(Self {
            config,
            signer,
            registry,
            cache: QuorumCache::new(),
            pending,
            known_tx_sets: HashSet::new(),
            slots: BTreeMap::new(),
            current_slot: SlotIndex::zero(),
            next_externalize: SlotIndex::zero(),
            undelivered: BTreeMap::new(),
            last_close_ms: None,
            outbox: Outbox::default(),
            stats: OrchestratorStats::default(),
        })
    }

    pub fn local_node_id(&self) -> NodeId {
        self.signer.node_id()
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn current_slot(&self) -> SlotIndex {
        self.current_slot
    }

    pub fn slot_phase(&self, index: SlotIndex) -> Option<SlotPhase> {
        self.slots.get(&index.as_u64()).map(Slot::phase)
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_validating(&self) -> bool {
        self.signer.is_validating()
    }

    pub fn set_validating(&mut self, validating: bool) {
        self.signer.set_validating(validating);
    }

    /// Drains the accumulated side effects. Call after every entry point.
    pub fn drain_outbox(&mut self) -> Outbox {
        std::mem::take(&mut self.outbox)
    }

    pub fn outbox_is_empty(&self) -> bool {
        self.outbox.is_empty()
    }

    /// Earliest wall-clock deadline any active slot is waiting on.
    pub fn next_deadline(&self) -> Option<u64> {
        self.slots.values().filter_map(Slot::next_deadline).min()
    }

    /// Positions the core from the ledger engine's persisted state: the
    /// first slot this node works on is the one after the last committed.
    pub fn resume_from(
        &mut self,
        last_committed: Option<(SlotIndex, LedgerValue)>,
        now_ms: u64,
    ) -> Result<(), ConsensusError> {
        let next = match last_committed {
            Some((index, value)) => {
                info!(target: LOG_TARGET, "Resuming after committed {}", index);
                self.known_tx_sets.insert(value.tx_set_hash);
                index.next()
            },
            None => SlotIndex::zero(),
        };
        self.next_externalize = next;
        self.current_slot = next;
        self.start_slot(next, now_ms)
    }

    /// Opens `index` as the active slot (idempotent for an already-open
    /// slot) and drains buffered statements that fell inside the window.
    pub fn start_slot(&mut self, index: SlotIndex, now_ms: u64) -> Result<(), ConsensusError> {
        if index < self.current_slot {
            return Ok(());
        }
        self.current_slot = index;
        // Entries are pure in their keys; clearing between slots just bounds
        // the memo tables
        self.cache.clear();
        if let Entry::Vacant(entry) = self.slots.entry(index.as_u64()) {
            let open_after = self
                .last_close_ms
                .map(|closed| closed + self.config.min_close_interval_ms);
            debug!(
                target: LOG_TARGET,
                "▶️ Opening {} ({})",
                index,
                if open_after.is_some() { "throttled" } else { "immediate" }
            );
            entry.insert(Slot::new(index, open_after));
        }

        let horizon = SlotIndex(index.as_u64().saturating_add(self.config.slot_window));
        let released = self.pending.release_slots_through(horizon);
        self.stats.released += released.len() as u64;
        for statement in released {
            self.process_verified(statement, now_ms)?;
        }
        self.step_slot(index, now_ms)
    }

    /// The herder's proposal for the current slot. Proposing a value implies
    /// its transaction set is locally available.
    pub fn propose_value(&mut self, value: LedgerValue, now_ms: u64) -> Result<(), ConsensusError> {
        self.on_tx_set(value.tx_set_hash, now_ms)?;
        let index = self.current_slot;
        if let Some(slot) = self.slots.get_mut(&index.as_u64()) {
            if !slot.phase().is_terminal() {
                slot.set_candidate(value);
            }
        }
        self.step_slot(index, now_ms)
    }

    /// Single entry for inbound statements. Verifies, parks on missing
    /// prerequisites, records, and steps the slot. Protocol-level problems
    /// are logged and counted, never returned.
    pub fn receive_statement(&mut self, statement: SignedStatement, now_ms: u64) -> Result<(), ConsensusError> {
        self.stats.received += 1;
        if statement.statement.from == self.signer.node_id() {
            // Overlay echo of our own broadcast
            return Ok(());
        }
        if let Err(err) = statement.verify(self.signer.signing_domain()) {
            self.stats.bad_signature += 1;
            warn!(target: LOG_TARGET, "Rejecting {}: {}", statement, err);
            return Ok(());
        }
        self.process_verified(statement, now_ms)
    }

    fn process_verified(&mut self, statement: SignedStatement, now_ms: u64) -> Result<(), ConsensusError> {
        let index = statement.statement.slot_index;
        let from = statement.statement.from;
        let qset_hash = statement.statement.qset_hash;
        let tx_set_hash = statement.statement.value.tx_set_hash;

        self.registry.observe(from, qset_hash);

        // Collect every missing prerequisite in one pass so a statement
        // lands in all applicable queues at once
        let mut reasons = Vec::new();
        let horizon = SlotIndex(self.current_slot.as_u64().saturating_add(self.config.slot_window));
        if index > horizon {
            reasons.push(PendingReason::AwaitingSlot(index));
        }
        if !self.registry.is_resolved(&qset_hash) {
            reasons.push(PendingReason::AwaitingQuorumSet(qset_hash));
            self.outbox.missing_quorum_sets.push(qset_hash);
        }
        if !self.known_tx_sets.contains(&tx_set_hash) {
            reasons.push(PendingReason::AwaitingTxSet(tx_set_hash));
            self.outbox.missing_tx_sets.push(tx_set_hash);
        }
        if !reasons.is_empty() {
            debug!(
                target: LOG_TARGET,
                "Parking {} ({} missing prerequisite(s))",
                statement,
                reasons.len()
            );
            self.stats.parked += 1;
            self.stats.pending_evicted += self.pending.park(statement, reasons, now_ms) as u64;
            return Ok(());
        }

        if index < self.current_slot && !self.slots.contains_key(&index.as_u64()) {
            // The slot is gone; nothing left to learn from this
            self.stats.dropped_past_slot += 1;
            return Ok(());
        }
        let slot = self
            .slots
            .entry(index.as_u64())
            .or_insert_with(|| Slot::new(index, None));
        match slot.record(statement) {
            InsertOutcome::Stale => {
                self.stats.stale += 1;
                return Ok(());
            },
            InsertOutcome::Recorded => {},
        }
        self.step_slot(index, now_ms)
    }

    /// A transaction set became available locally; release its waiters.
    pub fn on_tx_set(&mut self, hash: TxSetHash, now_ms: u64) -> Result<(), ConsensusError> {
        if !self.known_tx_sets.insert(hash) {
            return Ok(());
        }
        let released = self.pending.resolve_tx_set(&hash);
        if !released.is_empty() {
            debug!(target: LOG_TARGET, "Tx set {} released {} statement(s)", hash, released.len());
        }
        self.stats.released += released.len() as u64;
        for statement in released {
            self.process_verified(statement, now_ms)?;
        }
        Ok(())
    }

    /// The overlay delivered a quorum set; bind it and release its waiters.
    pub fn on_quorum_set(&mut self, qset: QuorumSet, now_ms: u64) -> Result<(), ConsensusError> {
        if let Err(err) = qset.validate() {
            warn!(target: LOG_TARGET, "Dropping invalid quorum set: {}", err);
            return Ok(());
        }
        let hash = qset.hash();
        if !self.registry.bind_quorum_set(qset) {
            return Ok(());
        }
        let released = self.pending.resolve_quorum_set(&hash);
        if !released.is_empty() {
            debug!(
                target: LOG_TARGET,
                "Quorum set {} released {} statement(s)",
                hash,
                released.len()
            );
        }
        self.stats.released += released.len() as u64;
        for statement in released {
            self.process_verified(statement, now_ms)?;
        }
        Ok(())
    }

    /// Fires due slot timers and expires stale pending statements.
    pub fn on_timer(&mut self, now_ms: u64) -> Result<(), ConsensusError> {
        self.stats.pending_expired += self.pending.expire(now_ms) as u64;
        let due: Vec<u64> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.next_deadline().is_some_and(|deadline| now_ms >= deadline))
            .map(|(index, _)| *index)
            .collect();
        for index in due {
            let Some(mut slot) = self.slots.remove(&index) else {
                continue;
            };
            let mut ctx = self.slot_context(now_ms);
            let actions = slot.on_timeout(&mut ctx);
            self.slots.insert(index, slot);
            self.apply_actions(SlotIndex(index), actions, now_ms)?;
        }
        Ok(())
    }

    /// The ledger engine already has `index` decided (catch-up replay):
    /// cancel the in-flight slot, free its state, and advance. No partial
    /// externalize is ever delivered for a cancelled slot.
    pub fn on_ledger_caught_up(
        &mut self,
        index: SlotIndex,
        value: LedgerValue,
        now_ms: u64,
    ) -> Result<(), ConsensusError> {
        if index < self.current_slot {
            return Ok(());
        }
        info!(
            target: LOG_TARGET,
            "⤵️ Ledger caught up through {}; cancelling in-flight consensus", index
        );
        self.slots.retain(|slot_index, _| *slot_index > index.as_u64());
        self.undelivered.retain(|slot_index, _| *slot_index > index.as_u64());
        self.known_tx_sets.insert(value.tx_set_hash);
        if self.next_externalize <= index {
            self.next_externalize = index.next();
        }
        self.last_close_ms = Some(now_ms);
        self.current_slot = index.next();
        self.start_slot(index.next(), now_ms)
    }

    fn slot_context(&mut self, now_ms: u64) -> SlotContext<'_> {
        SlotContext {
            local_id: self.signer.node_id(),
            local_qset: &self.config.quorum_set,
            local_qset_hash: self.signer.qset_hash(),
            cache: &mut self.cache,
            config: &self.config,
            now_ms,
        }
    }

    fn step_slot(&mut self, index: SlotIndex, now_ms: u64) -> Result<(), ConsensusError> {
        let Some(mut slot) = self.slots.remove(&index.as_u64()) else {
            return Ok(());
        };
        let mut ctx = self.slot_context(now_ms);
        let actions = slot.advance(&mut ctx);
        self.slots.insert(index.as_u64(), slot);
        self.apply_actions(index, actions, now_ms)
    }

    fn apply_actions(&mut self, index: SlotIndex, actions: Vec<SlotAction>, now_ms: u64) -> Result<(), ConsensusError> {
        for action in actions {
            match action {
                SlotAction::Emit(draft) => {
                    if let Some(signed) = self.signer.emit(draft) {
                        // An own statement that fails verification means the
                        // configured seed does not produce our key; peers
                        // would drop everything we say
                        if let Err(err) = signed.verify(self.signer.signing_domain()) {
                            return Err(ConsensusError::InvariantViolation {
                                slot_index: index,
                                details: format!("own outbound statement failed verification: {}", err),
                            });
                        }
                        // Our own statement joins the slot store so quorum
                        // queries see it exactly like a peer's
                        if let Some(slot) = self.slots.get_mut(&index.as_u64()) {
                            slot.record(signed.clone());
                        }
                        debug!(target: LOG_TARGET, "📤 Broadcasting {}", signed);
                        self.outbox.broadcasts.push(signed);
                    }
                },
                SlotAction::Externalized(value) => {
                    self.on_slot_committed(index, value, now_ms)?;
                },
            }
        }
        Ok(())
    }

    fn on_slot_committed(&mut self, index: SlotIndex, value: LedgerValue, now_ms: u64) -> Result<(), ConsensusError> {
        if index < self.next_externalize {
            // Catch-up already handed this slot to the ledger engine
            return Ok(());
        }
        let proof = self
            .slots
            .get(&index.as_u64())
            .map(Slot::decision_proof)
            .unwrap_or_default();
        match self.undelivered.entry(index.as_u64()) {
            Entry::Occupied(existing) => {
                if existing.get().value != value {
                    return Err(ConsensusError::InvariantViolation {
                        slot_index: index,
                        details: format!(
                            "externalizing {} but {} was already decided for this slot",
                            value,
                            existing.get().value
                        ),
                    });
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(ExternalizedValue {
                    slot_index: index,
                    value,
                    proof,
                });
            },
        }
        self.deliver_ready(now_ms);
        if index >= self.current_slot {
            self.start_slot(index.next(), now_ms)?;
        }
        Ok(())
    }

    /// Hands decided slots to the outbox strictly in slot-index order.
    fn deliver_ready(&mut self, now_ms: u64) {
        while let Some(decided) = self.undelivered.remove(&self.next_externalize.as_u64()) {
            info!(
                target: LOG_TARGET,
                "🔔 Externalizing {} -> {}", decided.slot_index, decided.value
            );
            self.last_close_ms = Some(now_ms);
            self.next_externalize = self.next_externalize.next();
            self.outbox.externalized.push(decided);
        }
        self.prune_decided();
    }

    /// Frees committed slots once enough later slots have been decided.
    fn prune_decided(&mut self) {
        let delivered_through = match self.next_externalize.as_u64().checked_sub(1) {
            Some(index) => index,
            None => return,
        };
        let cutoff = delivered_through.saturating_sub(self.config.decided_slot_retention);
        self.slots
            .retain(|index, slot| *index >= cutoff || !slot.phase().is_terminal());
    }
}
