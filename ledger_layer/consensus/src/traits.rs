//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Contracts to the consensus core's collaborators: the transaction-set
//! herder, the ledger-close pipeline, the overlay broadcast path, and the
//! clock. The core itself never performs I/O; the worker drives these on the
//! core's behalf.

use async_trait::async_trait;
use meridian_common_types::{LedgerValue, SlotIndex, TxSetHash};

use crate::{messages::SignedStatement, orchestrator::ExternalizedValue};

/// Proposes transaction sets and resolves their hashes.
#[async_trait]
pub trait TxSetHerder: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The value this node would propose for `slot_index`, if any is ready.
    async fn current_proposal(&self, slot_index: SlotIndex) -> Result<Option<LedgerValue>, Self::Error>;

    /// Whether the transaction set behind `hash` is locally available.
    async fn has_tx_set(&self, hash: &TxSetHash) -> bool;

    /// Ask the overlay to fetch a transaction set we saw referenced.
    async fn request_tx_set(&self, hash: &TxSetHash);
}

/// The ledger-close pipeline. Delivery is strictly slot-ordered and must be
/// idempotent on repeated delivery of the same `(slot, value)`.
#[async_trait]
pub trait LedgerCloseEngine: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn externalize(&self, decided: ExternalizedValue) -> Result<(), Self::Error>;

    /// The resume point: last committed slot and value, if any.
    async fn last_committed(&self) -> Result<Option<(SlotIndex, LedgerValue)>, Self::Error>;
}

/// Overlay broadcast path for this replica's own statements.
#[async_trait]
pub trait StatementOutbound: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn broadcast(&self, statement: SignedStatement) -> Result<(), Self::Error>;
}

/// Time source. Production uses the system clock; tests drive a manual one
/// so every run is reproducible.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Bundles the concrete collaborator types for one deployment so services
/// can reference a single type parameter.
pub trait ConsensusSpec: Send + Sync + 'static {
    type Herder: TxSetHerder;
    type Ledger: LedgerCloseEngine;
    type Outbound: StatementOutbound;
    type Clock: Clock;
}
