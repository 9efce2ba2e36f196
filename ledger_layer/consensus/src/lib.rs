//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! The consensus core of a Meridian validator: the per-node state machine
//! that drives each replica through a sequence of slots, exchanges signed
//! votes with a configurable quorum of peers, and decides on a single
//! transaction set to externalize per slot.

pub mod config;
pub mod error;
pub mod messages;
pub mod node_registry;
pub mod orchestrator;
pub mod pending;
pub mod quorum;
pub mod signer;
pub mod slot;
pub mod statement_store;
pub mod traits;
pub mod worker;

pub use config::{ConfigError, ConsensusConfig};
pub use error::ConsensusError;
pub use orchestrator::{ConsensusOrchestrator, ExternalizedValue, OrchestratorStats, Outbox};
pub use slot::SlotPhase;
pub use worker::{spawn, ConsensusCommand, ConsensusEvent, ConsensusHandle};
