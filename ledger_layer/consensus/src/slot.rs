//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! One slot's federated-voting state machine.
//!
//! Phases move strictly forward: WAITING -> UNPREPARED -> PREPARED ->
//! RATIFIED -> COMMITTED. The slot never performs I/O; every transition
//! returns actions (statements to emit, a decision to deliver) for the
//! orchestrator to carry out after the step completes, so a single inbound
//! statement runs to a quiescent point without re-entering the machine.

use std::collections::{BTreeMap, BTreeSet};

use log::*;
use meridian_common_types::{Ballot, LedgerValue, NodeId, QuorumSet, QuorumSetHash, SlotIndex, ValueHash};

use crate::{
    config::ConsensusConfig,
    messages::{
        ConfirmExtras,
        ExternalizeExtras,
        PrepareExtras,
        SignedStatement,
        StatementDraft,
        StatementKind,
        StatementPayload,
    },
    quorum::QuorumCache,
    statement_store::{InsertOutcome, StatementStore},
};

const LOG_TARGET: &str = "meridian::consensus::slot";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotPhase {
    Waiting,
    Unprepared,
    Prepared,
    Ratified,
    Committed,
}

impl SlotPhase {
    pub fn is_terminal(self) -> bool {
        self == SlotPhase::Committed
    }
}

impl std::fmt::Display for SlotPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotPhase::Waiting => "WAITING",
            SlotPhase::Unprepared => "UNPREPARED",
            SlotPhase::Prepared => "PREPARED",
            SlotPhase::Ratified => "RATIFIED",
            SlotPhase::Committed => "COMMITTED",
        };
        write!(f, "{}", name)
    }
}

/// Everything a slot transition needs from the rest of the core. Borrowed
/// per call; the slot owns no shared state.
pub struct SlotContext<'a> {
    pub local_id: NodeId,
    pub local_qset: &'a QuorumSet,
    pub local_qset_hash: QuorumSetHash,
    pub cache: &'a mut QuorumCache,
    pub config: &'a ConsensusConfig,
    pub now_ms: u64,
}

impl SlotContext<'_> {
    fn v_blocking(&mut self, nodes: &BTreeSet<NodeId>) -> bool {
        !nodes.is_empty() && self.cache.is_v_blocking(self.local_qset, self.local_qset_hash, nodes)
    }

    /// Quorum check from the local perspective. The replica always counts
    /// itself as agreeing with its own current ballot, broadcast or not;
    /// this is what lets a non-validating replica ride a committing quorum.
    fn quorum_with_self(&mut self, mut nodes: BTreeSet<NodeId>) -> bool {
        let local_id = self.local_id;
        nodes.insert(local_id);
        self.cache.is_quorum(self.local_qset, self.local_qset_hash, &local_id, &nodes)
    }

    fn ballot_timeout(&self, counter: u32) -> u64 {
        // Linear growth with the counter keeps contested slots from
        // thrashing
        self.config.ballot_timeout_ms.saturating_mul(counter.max(1) as u64)
    }
}

#[derive(Debug)]
pub enum SlotAction {
    /// Ask the local signer to publish this statement.
    Emit(StatementDraft),
    /// The slot reached COMMITTED on this value.
    Externalized(LedgerValue),
}

#[derive(Debug)]
pub struct Slot {
    index: SlotIndex,
    phase: SlotPhase,
    own_ballot: Option<Ballot>,
    current_value: Option<LedgerValue>,
    candidate: Option<LedgerValue>,
    statements: StatementStore,
    decision: Option<LedgerValue>,
    open_after_ms: Option<u64>,
    phase_deadline_ms: Option<u64>,
}

impl Slot {
    /// A slot opens in WAITING when a close-interval throttle applies,
    /// otherwise directly in UNPREPARED.
    pub fn new(index: SlotIndex, open_after_ms: Option<u64>) -> Self {
        Self {
            index,
            phase: if open_after_ms.is_some() {
                SlotPhase::Waiting
            } else {
                SlotPhase::Unprepared
            },
            own_ballot: None,
            current_value: None,
            candidate: None,
            statements: StatementStore::new(),
            decision: None,
            open_after_ms,
            phase_deadline_ms: None,
        }
    }

    pub fn index(&self) -> SlotIndex {
        self.index
    }

    pub fn phase(&self) -> SlotPhase {
        self.phase
    }

    pub fn own_ballot(&self) -> Option<Ballot> {
        self.own_ballot
    }

    pub fn decision(&self) -> Option<&LedgerValue> {
        self.decision.as_ref()
    }

    pub fn statements(&self) -> &StatementStore {
        &self.statements
    }

    /// Herder proposal for this slot. Only consulted while choosing the
    /// opening ballot; a slot already voting keeps its ballot.
    pub fn set_candidate(&mut self, value: LedgerValue) {
        self.candidate = Some(value);
    }

    pub fn record(&mut self, statement: SignedStatement) -> InsertOutcome {
        self.statements.insert(statement)
    }

    /// The recorded EXTERNALIZE statements backing the decision.
    pub fn decision_proof(&self) -> Vec<SignedStatement> {
        let Some(decision) = self.decision else {
            return Vec::new();
        };
        let hash = decision.hash();
        self.statements
            .statements()
            .filter(|signed| {
                signed.statement.kind() == StatementKind::Externalize && signed.statement.ballot.value_hash == hash
            })
            .cloned()
            .collect()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match self.phase {
            SlotPhase::Waiting => self.open_after_ms,
            SlotPhase::Committed => None,
            _ => self.phase_deadline_ms,
        }
    }

    /// Runs every transition whose condition holds, repeatedly, until the
    /// slot is quiescent.
    pub fn advance(&mut self, ctx: &mut SlotContext<'_>) -> Vec<SlotAction> {
        let mut actions = Vec::new();
        loop {
            let before = (self.phase, self.own_ballot);
            match self.phase {
                SlotPhase::Waiting => self.try_open(ctx),
                SlotPhase::Unprepared => self.try_prepare(ctx, &mut actions),
                SlotPhase::Prepared => self.try_ratify(ctx, &mut actions),
                SlotPhase::Ratified => self.try_commit(ctx, &mut actions),
                SlotPhase::Committed => {},
            }
            if (self.phase, self.own_ballot) == before {
                break;
            }
        }
        actions
    }

    /// Fires the ballot timer if due: bump the counter, keep the value
    /// unless a v-blocking set stands behind a different one, re-issue the
    /// current phase's statement.
    pub fn on_timeout(&mut self, ctx: &mut SlotContext<'_>) -> Vec<SlotAction> {
        let mut actions = Vec::new();
        let due = self.phase_deadline_ms.is_some_and(|deadline| ctx.now_ms >= deadline);
        if due && matches!(self.phase, SlotPhase::Prepared | SlotPhase::Ratified) {
            let own = self.own_ballot.expect("voting phase implies a ballot");
            let value = match self.leading_value(ctx) {
                Some(leading) if leading.hash() != own.value_hash => {
                    info!(
                        target: LOG_TARGET,
                        "⏱ {} timeout at {}: adopting leading value {}", self.index, own, leading
                    );
                    leading
                },
                _ => self.current_value.expect("voting phase implies a value"),
            };
            let bumped = Ballot::new(own.counter + 1, value.hash());
            debug!(target: LOG_TARGET, "{} ballot timeout: {} -> {}", self.index, own, bumped);
            self.own_ballot = Some(bumped);
            self.current_value = Some(value);
            self.phase_deadline_ms = Some(ctx.now_ms + ctx.ballot_timeout(bumped.counter));
            self.emit_current_phase(&mut actions, own);
        }
        actions.extend(self.advance(ctx));
        actions
    }

    fn set_phase(&mut self, phase: SlotPhase) {
        debug_assert!(phase > self.phase, "phase regression {} -> {}", self.phase, phase);
        debug!(target: LOG_TARGET, "{}: {} -> {}", self.index, self.phase, phase);
        self.phase = phase;
    }

    fn try_open(&mut self, ctx: &mut SlotContext<'_>) {
        let throttle_over = self.open_after_ms.map_or(true, |after| ctx.now_ms >= after);
        let v_blocking_active = ctx.config.waiting_skip_on_v_blocking && {
            let senders = self.statements.senders();
            ctx.v_blocking(&senders)
        };
        if throttle_over || v_blocking_active {
            if !throttle_over {
                debug!(
                    target: LOG_TARGET,
                    "{}: v-blocking set already working this slot, skipping close throttle", self.index
                );
            }
            self.open_after_ms = None;
            self.set_phase(SlotPhase::Unprepared);
        }
    }

    fn try_prepare(&mut self, ctx: &mut SlotContext<'_>, actions: &mut Vec<SlotAction>) {
        let Some(value) = self.opening_value() else {
            return;
        };
        let counter = self.own_ballot.map(|ballot| ballot.counter).unwrap_or(1).max(1);
        let ballot = Ballot::new(counter, value.hash());
        self.own_ballot = Some(ballot);
        self.current_value = Some(value);
        self.set_phase(SlotPhase::Prepared);
        self.phase_deadline_ms = Some(ctx.now_ms + ctx.ballot_timeout(counter));
        actions.push(SlotAction::Emit(StatementDraft {
            slot_index: self.index,
            ballot,
            value,
            payload: StatementPayload::Prepare(PrepareExtras::default()),
        }));
    }

    /// The opening value: the herder's proposal when there is one, otherwise
    /// the lexicographically-least value (by hash) seen from peers.
    fn opening_value(&self) -> Option<LedgerValue> {
        self.candidate.or_else(|| {
            self.statements
                .statements()
                .map(|signed| signed.statement.value)
                .min_by_key(LedgerValue::hash)
        })
    }

    fn try_ratify(&mut self, ctx: &mut SlotContext<'_>, actions: &mut Vec<SlotAction>) {
        let own = self.own_ballot.expect("PREPARED implies a ballot");
        let prepared_quorum = {
            let voters = self.statements.nodes_that_prepared(&own);
            ctx.quorum_with_self(voters)
        };
        let v_blocking_confirmed = {
            let voters = self.statements.nodes_that_confirmed(&own);
            ctx.v_blocking(&voters)
        };
        if prepared_quorum || v_blocking_confirmed {
            self.set_phase(SlotPhase::Ratified);
            self.phase_deadline_ms = Some(ctx.now_ms + ctx.ballot_timeout(own.counter));
            actions.push(SlotAction::Emit(StatementDraft {
                slot_index: self.index,
                ballot: own,
                value: self.current_value.expect("PREPARED implies a value"),
                payload: StatementPayload::Confirm(ConfirmExtras {
                    prepared_counter: own.counter,
                }),
            }));
        } else {
            self.maybe_bump(ctx, actions);
        }
    }

    fn try_commit(&mut self, ctx: &mut SlotContext<'_>, actions: &mut Vec<SlotAction>) {
        let own = self.own_ballot.expect("RATIFIED implies a ballot");
        let confirmed_quorum = {
            let voters = self.statements.nodes_that_confirmed(&own);
            ctx.quorum_with_self(voters)
        };
        let v_blocking_committed = {
            let voters = self.statements.nodes_committed(&own);
            ctx.v_blocking(&voters)
        };
        if confirmed_quorum || v_blocking_committed {
            let value = self.current_value.expect("RATIFIED implies a value");
            self.decision = Some(value);
            self.set_phase(SlotPhase::Committed);
            self.phase_deadline_ms = None;
            info!(target: LOG_TARGET, "✅ {} committed {} at {}", self.index, value, own);
            actions.push(SlotAction::Emit(StatementDraft {
                slot_index: self.index,
                ballot: own,
                value,
                payload: StatementPayload::Externalize(ExternalizeExtras {
                    commit_counter_low: own.counter,
                    commit_counter_high: own.counter,
                }),
            }));
            actions.push(SlotAction::Externalized(value));
        } else {
            self.maybe_bump(ctx, actions);
        }
    }

    /// Abort the current ballot when a v-blocking set of peers is working a
    /// higher counter: adopt the most advanced ballot among them (ties to
    /// the least value hash) and re-issue the current phase's statement.
    fn maybe_bump(&mut self, ctx: &mut SlotContext<'_>, actions: &mut Vec<SlotAction>) {
        let Some(own) = self.own_ballot else {
            return;
        };
        let mut ahead = BTreeSet::new();
        let mut best: Option<(Ballot, LedgerValue)> = None;
        for signed in self.statements.statements() {
            let ballot = signed.statement.ballot;
            if ballot.counter <= own.counter {
                continue;
            }
            ahead.insert(signed.statement.from);
            let better = match &best {
                None => true,
                Some((current, _)) => {
                    ballot.counter > current.counter
                        || (ballot.counter == current.counter && ballot.value_hash < current.value_hash)
                },
            };
            if better {
                best = Some((ballot, signed.statement.value));
            }
        }
        if !ctx.v_blocking(&ahead) {
            return;
        }
        let (adopted, value) = best.expect("v-blocking set is non-empty");
        info!(
            target: LOG_TARGET,
            "{}: v-blocking set ahead, aborting {} for {}", self.index, own, adopted
        );
        self.own_ballot = Some(adopted);
        self.current_value = Some(value);
        self.phase_deadline_ms = Some(ctx.now_ms + ctx.ballot_timeout(adopted.counter));
        self.emit_current_phase(actions, own);
    }

    /// Re-issues the statement of the phase we are in at the (new) own
    /// ballot.
    fn emit_current_phase(&mut self, actions: &mut Vec<SlotAction>, previous: Ballot) {
        let ballot = self.own_ballot.expect("caller set the ballot");
        let value = self.current_value.expect("caller set the value");
        let payload = match self.phase {
            SlotPhase::Prepared => StatementPayload::Prepare(PrepareExtras {
                prepared: Some(previous),
                aborted: (!previous.is_compatible(&ballot)).then_some(previous),
            }),
            SlotPhase::Ratified => StatementPayload::Confirm(ConfirmExtras {
                prepared_counter: ballot.counter,
            }),
            _ => return,
        };
        actions.push(SlotAction::Emit(StatementDraft {
            slot_index: self.index,
            ballot,
            value,
            payload,
        }));
    }

    /// The value, if any, that a v-blocking set of peers stands behind with
    /// the most advanced evidence.
    fn leading_value(&self, ctx: &mut SlotContext<'_>) -> Option<LedgerValue> {
        let mut groups: BTreeMap<ValueHash, (BTreeSet<NodeId>, Ballot, LedgerValue)> = BTreeMap::new();
        for signed in self.statements.statements() {
            let statement = &signed.statement;
            let entry = groups
                .entry(statement.ballot.value_hash)
                .or_insert_with(|| (BTreeSet::new(), statement.ballot, statement.value));
            entry.0.insert(statement.from);
            if statement.ballot > entry.1 {
                entry.1 = statement.ballot;
            }
        }
        let mut best: Option<(Ballot, LedgerValue)> = None;
        for (hash, (senders, ballot, value)) in groups {
            if !ctx.v_blocking(&senders) {
                continue;
            }
            let better = match &best {
                None => true,
                Some((current, _)) => {
                    ballot.counter > current.counter
                        || (ballot.counter == current.counter && hash < current.value_hash)
                },
            };
            if better {
                best = Some((ballot, value));
            }
        }
        best.map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use meridian_common_types::{LedgerHash, NodeKeypair, NodeSeed, QuorumSetMember, TxSetHash};

    use super::*;
    use crate::messages::{signing_domain, Statement};

    const PASSPHRASE: &str = "meridian test net";

    fn keypair(n: u8) -> NodeKeypair {
        NodeKeypair::from_seed(&NodeSeed::new([n; 32]))
    }

    fn value(tag: u8) -> LedgerValue {
        LedgerValue::new(LedgerHash::zero(), TxSetHash::from([tag; 32]), 1_000)
    }

    fn three_node_qset() -> QuorumSet {
        QuorumSet::new(
            2,
            (1..=3u8).map(|n| QuorumSetMember::Node(keypair(n).node_id())).collect(),
        )
        .unwrap()
    }

    struct Fixture {
        config: ConsensusConfig,
        qset: QuorumSet,
        cache: QuorumCache,
        local: NodeKeypair,
    }

    impl Fixture {
        fn new(qset: QuorumSet) -> Self {
            let seed = NodeSeed::new([1; 32]);
            let local = NodeKeypair::from_seed(&seed);
            Self {
                config: ConsensusConfig::new(seed, qset.clone(), PASSPHRASE),
                qset,
                cache: QuorumCache::new(),
                local,
            }
        }

        fn ctx(&mut self, now_ms: u64) -> SlotContext<'_> {
            SlotContext {
                local_id: self.local.node_id(),
                local_qset: &self.qset,
                local_qset_hash: self.qset.hash(),
                cache: &mut self.cache,
                config: &self.config,
                now_ms,
            }
        }
    }

    fn peer_statement(node: u8, counter: u32, value_tag: u8, kind: StatementKind) -> SignedStatement {
        let keypair = keypair(node);
        let value = value(value_tag);
        let ballot = Ballot::new(counter, value.hash());
        let payload = match kind {
            StatementKind::Prepare => StatementPayload::Prepare(PrepareExtras::default()),
            StatementKind::Confirm => StatementPayload::Confirm(ConfirmExtras {
                prepared_counter: counter,
            }),
            StatementKind::Externalize => StatementPayload::Externalize(ExternalizeExtras {
                commit_counter_low: counter,
                commit_counter_high: counter,
            }),
        };
        Statement {
            slot_index: SlotIndex(0),
            from: keypair.node_id(),
            qset_hash: QuorumSetHash::from([0xab; 32]),
            ballot,
            value,
            payload,
        }
        .sign(&keypair, &signing_domain(PASSPHRASE))
    }

    fn emitted_kinds(actions: &[SlotAction]) -> Vec<StatementKind> {
        actions
            .iter()
            .filter_map(|action| match action {
                SlotAction::Emit(draft) => Some(draft.payload.kind()),
                SlotAction::Externalized(_) => None,
            })
            .collect()
    }

    #[test]
    fn single_node_runs_to_committed_in_one_step() {
        let mut fixture = Fixture::new(QuorumSet::singleton(keypair(1).node_id()));
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));

        let actions = slot.advance(&mut fixture.ctx(0));
        assert_eq!(emitted_kinds(&actions), vec![
            StatementKind::Prepare,
            StatementKind::Confirm,
            StatementKind::Externalize,
        ]);
        assert!(matches!(actions.last(), Some(SlotAction::Externalized(v)) if *v == value(0xaa)));
        assert_eq!(slot.phase(), SlotPhase::Committed);
        assert_eq!(slot.own_ballot().unwrap(), Ballot::new(1, value(0xaa).hash()));
        assert_eq!(slot.decision(), Some(&value(0xaa)));
    }

    #[test]
    fn three_nodes_progress_tracks_peer_votes() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));

        // Own proposal alone: prepare and wait
        let actions = slot.advance(&mut fixture.ctx(0));
        assert_eq!(emitted_kinds(&actions), vec![StatementKind::Prepare]);
        assert_eq!(slot.phase(), SlotPhase::Prepared);

        // One compatible peer PREPARE completes a 2-of-3 quorum with us
        slot.record(peer_statement(2, 1, 0xaa, StatementKind::Prepare));
        let actions = slot.advance(&mut fixture.ctx(10));
        assert_eq!(emitted_kinds(&actions), vec![StatementKind::Confirm]);
        assert_eq!(slot.phase(), SlotPhase::Ratified);

        // A peer CONFIRM then closes the confirm quorum
        slot.record(peer_statement(2, 1, 0xaa, StatementKind::Confirm));
        let actions = slot.advance(&mut fixture.ctx(20));
        assert_eq!(emitted_kinds(&actions), vec![StatementKind::Externalize]);
        assert_eq!(slot.phase(), SlotPhase::Committed);
    }

    #[test]
    fn incompatible_peers_do_not_form_a_quorum() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));
        slot.advance(&mut fixture.ctx(0));

        slot.record(peer_statement(2, 1, 0xbb, StatementKind::Prepare));
        let actions = slot.advance(&mut fixture.ctx(10));
        assert!(actions.is_empty());
        assert_eq!(slot.phase(), SlotPhase::Prepared);
    }

    #[test]
    fn opening_value_adopts_least_hash_without_candidate() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.record(peer_statement(2, 1, 0xaa, StatementKind::Prepare));
        slot.record(peer_statement(3, 1, 0xbb, StatementKind::Prepare));

        let expected = [value(0xaa), value(0xbb)]
            .into_iter()
            .min_by_key(LedgerValue::hash)
            .unwrap();
        let actions = slot.advance(&mut fixture.ctx(0));
        assert!(!actions.is_empty());
        assert_eq!(slot.own_ballot().unwrap().value_hash, expected.hash());
    }

    #[test]
    fn v_blocking_higher_counter_forces_adoption() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));
        slot.advance(&mut fixture.ctx(0));
        assert_eq!(slot.own_ballot().unwrap().counter, 1);

        // Both peers ahead on counter 3 with another value: v-blocking (2 of
        // a 2-of-3 set), so the slot aborts (1, aa) and adopts (3, bb)
        slot.record(peer_statement(2, 3, 0xbb, StatementKind::Prepare));
        slot.record(peer_statement(3, 3, 0xbb, StatementKind::Prepare));
        let actions = slot.advance(&mut fixture.ctx(10));

        let own = slot.own_ballot().unwrap();
        assert_eq!(own, Ballot::new(3, value(0xbb).hash()));
        // Re-issued PREPARE at the adopted ballot, then the prepare quorum
        // on bb carries the slot to RATIFIED
        let kinds = emitted_kinds(&actions);
        assert_eq!(kinds, vec![StatementKind::Prepare, StatementKind::Confirm]);
        assert_eq!(slot.phase(), SlotPhase::Ratified);
    }

    #[test]
    fn single_peer_ahead_is_not_v_blocking() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));
        slot.advance(&mut fixture.ctx(0));

        slot.record(peer_statement(2, 5, 0xbb, StatementKind::Prepare));
        slot.advance(&mut fixture.ctx(10));
        assert_eq!(slot.own_ballot().unwrap(), Ballot::new(1, value(0xaa).hash()));
    }

    #[test]
    fn timeout_bumps_counter_linearly() {
        let mut fixture = Fixture::new(three_node_qset());
        let base = fixture.config.ballot_timeout_ms;
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));
        slot.advance(&mut fixture.ctx(0));
        assert_eq!(slot.next_deadline(), Some(base));

        // Not due yet
        assert!(emitted_kinds(&slot.on_timeout(&mut fixture.ctx(base - 1))).is_empty());

        let actions = slot.on_timeout(&mut fixture.ctx(base));
        assert_eq!(emitted_kinds(&actions), vec![StatementKind::Prepare]);
        assert_eq!(slot.own_ballot().unwrap(), Ballot::new(2, value(0xaa).hash()));
        // Second timeout is two base intervals out
        assert_eq!(slot.next_deadline(), Some(base + 2 * base));
    }

    #[test]
    fn timeout_adopts_v_blocking_leading_value() {
        let mut fixture = Fixture::new(three_node_qset());
        let base = fixture.config.ballot_timeout_ms;
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));
        slot.advance(&mut fixture.ctx(0));

        // Same counter, so no in-phase bump, but both peers stand behind bb
        slot.record(peer_statement(2, 1, 0xbb, StatementKind::Confirm));
        slot.record(peer_statement(3, 1, 0xbb, StatementKind::Prepare));
        slot.advance(&mut fixture.ctx(1));
        assert_eq!(slot.own_ballot().unwrap().value_hash, value(0xaa).hash());

        slot.on_timeout(&mut fixture.ctx(base));
        assert_eq!(slot.own_ballot().unwrap(), Ballot::new(2, value(0xbb).hash()));
    }

    #[test]
    fn waiting_opens_after_throttle() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(1), Some(2_000));
        slot.set_candidate(value(0xaa));

        assert!(slot.advance(&mut fixture.ctx(100)).is_empty());
        assert_eq!(slot.phase(), SlotPhase::Waiting);
        assert_eq!(slot.next_deadline(), Some(2_000));

        let actions = slot.advance(&mut fixture.ctx(2_000));
        assert_eq!(emitted_kinds(&actions), vec![StatementKind::Prepare]);
    }

    #[test]
    fn waiting_skips_throttle_on_v_blocking_evidence() {
        let mut fixture = Fixture::new(three_node_qset());
        let mut slot = Slot::new(SlotIndex(1), Some(2_000));
        slot.set_candidate(value(0xaa));

        slot.record(peer_statement(2, 1, 0xaa, StatementKind::Prepare));
        assert!(slot.advance(&mut fixture.ctx(100)).is_empty());
        assert_eq!(slot.phase(), SlotPhase::Waiting);

        slot.record(peer_statement(3, 1, 0xaa, StatementKind::Prepare));
        let actions = slot.advance(&mut fixture.ctx(100));
        assert!(!actions.is_empty());
        assert!(slot.phase() > SlotPhase::Waiting);
    }

    #[test]
    fn waiting_skip_can_be_disabled() {
        let mut fixture = Fixture::new(three_node_qset());
        fixture.config.waiting_skip_on_v_blocking = false;
        let mut slot = Slot::new(SlotIndex(1), Some(2_000));
        slot.set_candidate(value(0xaa));
        slot.record(peer_statement(2, 1, 0xaa, StatementKind::Prepare));
        slot.record(peer_statement(3, 1, 0xaa, StatementKind::Prepare));

        assert!(slot.advance(&mut fixture.ctx(100)).is_empty());
        assert_eq!(slot.phase(), SlotPhase::Waiting);
    }

    #[test]
    fn committed_slot_is_inert() {
        let mut fixture = Fixture::new(QuorumSet::singleton(keypair(1).node_id()));
        let mut slot = Slot::new(SlotIndex(0), None);
        slot.set_candidate(value(0xaa));
        slot.advance(&mut fixture.ctx(0));
        assert_eq!(slot.phase(), SlotPhase::Committed);

        // Late statements record but trigger nothing
        slot.record(peer_statement(2, 9, 0xbb, StatementKind::Prepare));
        assert!(slot.advance(&mut fixture.ctx(10)).is_empty());
        assert!(slot.on_timeout(&mut fixture.ctx(1_000_000)).is_empty());
        assert_eq!(slot.decision(), Some(&value(0xaa)));
    }
}
