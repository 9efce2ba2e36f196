//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Drives the async consensus service end to end with in-memory
//! collaborators.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use meridian_common_types::{LedgerValue, SlotIndex, TxSetHash};
use meridian_consensus::{
    messages::SignedStatement,
    orchestrator::ExternalizedValue,
    traits::{ConsensusSpec, LedgerCloseEngine, StatementOutbound, SystemClock, TxSetHerder},
    worker,
    ConsensusEvent,
};
use tokio_util::sync::CancellationToken;

use crate::support::{shared_qset_config, test_value};

#[derive(Debug, thiserror::Error)]
#[error("test collaborator failure")]
struct TestShimError;

/// Proposals are driven through explicit `Propose` commands in these tests,
/// so the herder never volunteers one.
#[derive(Clone, Default)]
struct MemoryHerder {
    known: Arc<Mutex<HashSet<TxSetHash>>>,
}

#[async_trait]
impl TxSetHerder for MemoryHerder {
    type Error = TestShimError;

    async fn current_proposal(&self, _slot_index: SlotIndex) -> Result<Option<LedgerValue>, Self::Error> {
        Ok(None)
    }

    async fn has_tx_set(&self, hash: &TxSetHash) -> bool {
        self.known.lock().unwrap().contains(hash)
    }

    async fn request_tx_set(&self, _hash: &TxSetHash) {}
}

#[derive(Clone, Default)]
struct MemoryLedger {
    committed: Arc<Mutex<Vec<ExternalizedValue>>>,
}

#[async_trait]
impl LedgerCloseEngine for MemoryLedger {
    type Error = TestShimError;

    async fn externalize(&self, decided: ExternalizedValue) -> Result<(), Self::Error> {
        self.committed.lock().unwrap().push(decided);
        Ok(())
    }

    async fn last_committed(&self) -> Result<Option<(SlotIndex, LedgerValue)>, Self::Error> {
        Ok(None)
    }
}

#[derive(Clone, Default)]
struct MemoryOutbound {
    sent: Arc<Mutex<Vec<SignedStatement>>>,
}

#[async_trait]
impl StatementOutbound for MemoryOutbound {
    type Error = TestShimError;

    async fn broadcast(&self, statement: SignedStatement) -> Result<(), Self::Error> {
        self.sent.lock().unwrap().push(statement);
        Ok(())
    }
}

struct TestSpec;

impl ConsensusSpec for TestSpec {
    type Clock = SystemClock;
    type Herder = MemoryHerder;
    type Ledger = MemoryLedger;
    type Outbound = MemoryOutbound;
}

#[tokio::test]
async fn service_externalizes_single_node_proposal() {
    let config = shared_qset_config(1, 1, &[1]);
    let v0 = test_value(0xaa);

    let herder = MemoryHerder::default();
    let ledger = MemoryLedger::default();
    let outbound = MemoryOutbound::default();
    let cancel = CancellationToken::new();

    let (join_handle, handle) = worker::spawn::<TestSpec>(
        config,
        herder.clone(),
        ledger.clone(),
        outbound.clone(),
        SystemClock,
        cancel.clone(),
    )
    .unwrap();

    // Subscribe before proposing so the decision event cannot race past us
    let mut events = handle.subscribe();
    handle
        .send(meridian_consensus::ConsensusCommand::Propose(v0))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("decision within the deadline")
        .expect("event channel open");
    let ConsensusEvent::Decided { slot_index, value } = event;
    assert_eq!(slot_index, SlotIndex(0));
    assert_eq!(value, v0);

    let committed = ledger.committed.lock().unwrap().clone();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].slot_index, SlotIndex(0));
    assert_eq!(committed[0].value, v0);
    assert_eq!(outbound.sent.lock().unwrap().len(), 3);

    cancel.cancel();
    join_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn service_shuts_down_on_cancellation() {
    let config = shared_qset_config(1, 1, &[1]);
    let cancel = CancellationToken::new();
    let (join_handle, _handle) = worker::spawn::<TestSpec>(
        config,
        MemoryHerder::default(),
        MemoryLedger::default(),
        MemoryOutbound::default(),
        SystemClock,
        cancel.clone(),
    )
    .unwrap();

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), join_handle)
        .await
        .expect("prompt shutdown")
        .unwrap()
        .unwrap();
}
