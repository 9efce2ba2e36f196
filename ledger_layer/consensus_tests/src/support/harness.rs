//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! In-memory multi-node harness. Delivery is synchronous and FIFO with a
//! manual clock, so every run (and every re-run) is bit-for-bit
//! reproducible.

use std::collections::VecDeque;

use meridian_common_types::{LedgerValue, NodeId, QuorumSet, SlotIndex, TxSetHash};
use meridian_consensus::{
    messages::SignedStatement,
    orchestrator::{ConsensusOrchestrator, ExternalizedValue, Outbox},
    ConsensusConfig,
};

/// Everything ever fed into one node, with the clock reading at the time.
/// Replaying this log against a fresh orchestrator must reproduce the
/// node's outbound statements exactly.
#[derive(Clone, Debug)]
pub enum RecordedCall {
    Statement(SignedStatement, u64),
    Propose(LedgerValue, u64),
    TxSet(TxSetHash, u64),
    QuorumSet(QuorumSet, u64),
    Timer(u64),
}

pub struct TestNode {
    config: ConsensusConfig,
    orchestrator: ConsensusOrchestrator,
    pub sent: Vec<SignedStatement>,
    pub externalized: Vec<ExternalizedValue>,
    pub calls: Vec<RecordedCall>,
}

impl TestNode {
    fn new(config: ConsensusConfig) -> Self {
        let mut orchestrator = ConsensusOrchestrator::new(config.clone()).unwrap();
        orchestrator.resume_from(None, 0).unwrap();
        Self {
            config,
            orchestrator,
            sent: Vec::new(),
            externalized: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.orchestrator.local_node_id()
    }

    pub fn orchestrator(&self) -> &ConsensusOrchestrator {
        &self.orchestrator
    }

    pub fn committed_value(&self, slot_index: SlotIndex) -> Option<LedgerValue> {
        self.externalized
            .iter()
            .find(|decided| decided.slot_index == slot_index)
            .map(|decided| decided.value)
    }

    /// The ballot this node committed a slot at, read from its own
    /// EXTERNALIZE statement.
    pub fn committed_counter(&self, slot_index: SlotIndex) -> Option<u32> {
        self.sent
            .iter()
            .filter(|signed| {
                signed.statement.slot_index == slot_index
                    && signed.statement.kind() == meridian_consensus::messages::StatementKind::Externalize
            })
            .map(|signed| signed.statement.ballot.counter)
            .next_back()
    }

    fn apply(&mut self, call: RecordedCall) -> Outbox {
        self.calls.push(call.clone());
        match call {
            RecordedCall::Statement(statement, now) => self.orchestrator.receive_statement(statement, now).unwrap(),
            RecordedCall::Propose(value, now) => self.orchestrator.propose_value(value, now).unwrap(),
            RecordedCall::TxSet(hash, now) => self.orchestrator.on_tx_set(hash, now).unwrap(),
            RecordedCall::QuorumSet(qset, now) => self.orchestrator.on_quorum_set(qset, now).unwrap(),
            RecordedCall::Timer(now) => self.orchestrator.on_timer(now).unwrap(),
        }
        self.orchestrator.drain_outbox()
    }

    /// Replays this node's recorded inputs against a fresh core and returns
    /// the outbound statements the replay produced.
    pub fn replayed_output(&self) -> Vec<SignedStatement> {
        let mut fresh = ConsensusOrchestrator::new(self.config.clone()).unwrap();
        fresh.resume_from(None, 0).unwrap();
        let mut sent = Vec::new();
        sent.extend(fresh.drain_outbox().broadcasts);
        for call in &self.calls {
            match call.clone() {
                RecordedCall::Statement(statement, now) => fresh.receive_statement(statement, now).unwrap(),
                RecordedCall::Propose(value, now) => fresh.propose_value(value, now).unwrap(),
                RecordedCall::TxSet(hash, now) => fresh.on_tx_set(hash, now).unwrap(),
                RecordedCall::QuorumSet(qset, now) => fresh.on_quorum_set(qset, now).unwrap(),
                RecordedCall::Timer(now) => fresh.on_timer(now).unwrap(),
            }
            sent.extend(fresh.drain_outbox().broadcasts);
        }
        sent
    }
}

pub struct TestNetwork {
    pub nodes: Vec<TestNode>,
    pub now_ms: u64,
    queue: VecDeque<(NodeId, SignedStatement)>,
}

impl TestNetwork {
    /// Builds a network and exchanges every node's quorum set up front, the
    /// way a warmed-up overlay would have.
    pub fn build(configs: Vec<ConsensusConfig>) -> Self {
        let mut network = Self {
            nodes: configs.into_iter().map(TestNode::new).collect(),
            now_ms: 0,
            queue: VecDeque::new(),
        };
        let qsets: Vec<QuorumSet> = network
            .nodes
            .iter()
            .map(|node| node.config.quorum_set.clone())
            .collect();
        for qset in qsets {
            for index in 0..network.nodes.len() {
                let now = network.now_ms;
                let outbox = network.nodes[index].apply(RecordedCall::QuorumSet(qset.clone(), now));
                network.pump(index, outbox);
            }
        }
        network
    }

    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Announces a transaction set to every node.
    pub fn register_tx_set(&mut self, hash: TxSetHash) {
        for index in 0..self.nodes.len() {
            let now = self.now_ms;
            let outbox = self.nodes[index].apply(RecordedCall::TxSet(hash, now));
            self.pump(index, outbox);
        }
    }

    /// Herder proposal on one node. Does not deliver; call
    /// [`Self::deliver_all`] to exchange traffic.
    pub fn propose(&mut self, index: usize, value: LedgerValue) {
        let now = self.now_ms;
        let outbox = self.nodes[index].apply(RecordedCall::Propose(value, now));
        self.pump(index, outbox);
    }

    /// Delivers queued broadcasts FIFO to every node but the origin, until
    /// the network is quiescent.
    pub fn deliver_all(&mut self) {
        while let Some((origin, statement)) = self.queue.pop_front() {
            for index in 0..self.nodes.len() {
                if self.nodes[index].node_id() == origin {
                    continue;
                }
                let now = self.now_ms;
                let outbox = self.nodes[index].apply(RecordedCall::Statement(statement.clone(), now));
                self.pump(index, outbox);
            }
        }
    }

    /// Like [`Self::deliver_all`] but picks the next queued statement at
    /// random, for adversarial-ordering runs.
    pub fn deliver_shuffled(&mut self, rng: &mut impl rand::Rng) {
        while !self.queue.is_empty() {
            let pick = rng.gen_range(0..self.queue.len());
            let (origin, statement) = self.queue.remove(pick).expect("index in range");
            for index in 0..self.nodes.len() {
                if self.nodes[index].node_id() == origin {
                    continue;
                }
                let now = self.now_ms;
                let outbox = self.nodes[index].apply(RecordedCall::Statement(statement.clone(), now));
                self.pump(index, outbox);
            }
        }
    }

    /// Advances the manual clock and fires every node's timers. Does not
    /// deliver the resulting traffic.
    pub fn advance_time(&mut self, delta_ms: u64) {
        self.now_ms += delta_ms;
        for index in 0..self.nodes.len() {
            let now = self.now_ms;
            let outbox = self.nodes[index].apply(RecordedCall::Timer(now));
            self.pump(index, outbox);
        }
    }

    /// Total statements a node has broadcast for a slot.
    pub fn sent_for_slot(&self, index: usize, slot_index: SlotIndex) -> usize {
        self.nodes[index]
            .sent
            .iter()
            .filter(|signed| signed.statement.slot_index == slot_index)
            .count()
    }

    fn pump(&mut self, index: usize, outbox: Outbox) {
        let origin = self.nodes[index].node_id();
        for statement in outbox.broadcasts {
            self.nodes[index].sent.push(statement.clone());
            self.queue.push_back((origin, statement));
        }
        self.nodes[index].externalized.extend(outbox.externalized);
        // Fetch requests are the overlay's concern; scenario tests
        // pre-register the data they want resolved
    }
}
