//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Async service wrapping the synchronous consensus core.
//!
//! All consensus state lives on this task; commands arrive over an mpsc
//! channel and are applied one at a time, which is what gives the core its
//! single-threaded serial semantics. After every command the worker drains
//! the orchestrator's outbox: broadcasts go to the overlay, decisions to the
//! ledger-close engine (in slot order), fetch requests to the herder.

use log::*;
use meridian_common_types::{LedgerValue, QuorumSet, SlotIndex, TxSetHash};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::{sleep_until, Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ConsensusConfig,
    error::ConsensusError,
    messages::SignedStatement,
    orchestrator::ConsensusOrchestrator,
    traits::{Clock, ConsensusSpec, LedgerCloseEngine, StatementOutbound, TxSetHerder},
};

const LOG_TARGET: &str = "meridian::consensus::worker";

/// Capacity of the inbound command channel. Statement floods beyond this
/// apply backpressure to the overlay reader.
const COMMAND_CHANNEL_SIZE: usize = 512;
const EVENT_CHANNEL_SIZE: usize = 64;

#[derive(Debug)]
pub enum ConsensusCommand {
    Statement(SignedStatement),
    Propose(LedgerValue),
    TxSetReady(TxSetHash),
    QuorumSetReady(QuorumSet),
    LedgerCaughtUp(SlotIndex, LedgerValue),
    SetValidating(bool),
}

#[derive(Clone, Debug)]
pub enum ConsensusEvent {
    Decided { slot_index: SlotIndex, value: LedgerValue },
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusServiceError {
    #[error("Consensus worker has shut down")]
    ChannelClosed,
}

/// Cheap handle for feeding the worker and subscribing to decisions.
#[derive(Clone, Debug)]
pub struct ConsensusHandle {
    tx_commands: mpsc::Sender<ConsensusCommand>,
    tx_events: broadcast::Sender<ConsensusEvent>,
}

impl ConsensusHandle {
    pub async fn send(&self, command: ConsensusCommand) -> Result<(), ConsensusServiceError> {
        self.tx_commands
            .send(command)
            .await
            .map_err(|_| ConsensusServiceError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsensusEvent> {
        self.tx_events.subscribe()
    }
}

pub struct ConsensusWorker<TSpec: ConsensusSpec> {
    orchestrator: ConsensusOrchestrator,
    herder: TSpec::Herder,
    ledger: TSpec::Ledger,
    outbound: TSpec::Outbound,
    clock: TSpec::Clock,
    rx_commands: mpsc::Receiver<ConsensusCommand>,
    tx_events: broadcast::Sender<ConsensusEvent>,
    cancel: CancellationToken,
}

/// Spawns the consensus service. The worker resumes from the ledger
/// engine's persisted state before accepting commands.
pub fn spawn<TSpec: ConsensusSpec>(
    config: ConsensusConfig,
    herder: TSpec::Herder,
    ledger: TSpec::Ledger,
    outbound: TSpec::Outbound,
    clock: TSpec::Clock,
    cancel: CancellationToken,
) -> Result<(JoinHandle<Result<(), anyhow::Error>>, ConsensusHandle), ConsensusError> {
    let orchestrator = ConsensusOrchestrator::new(config)?;
    let (tx_commands, rx_commands) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    let (tx_events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
    let handle = ConsensusHandle {
        tx_commands,
        tx_events: tx_events.clone(),
    };
    let worker = ConsensusWorker::<TSpec> {
        orchestrator,
        herder,
        ledger,
        outbound,
        clock,
        rx_commands,
        tx_events,
        cancel,
    };
    let join_handle = tokio::spawn(worker.run());
    Ok((join_handle, handle))
}

impl<TSpec: ConsensusSpec> ConsensusWorker<TSpec> {
    pub async fn run(mut self) -> Result<(), anyhow::Error> {
        let resume_point = self.ledger.last_committed().await.map_err(anyhow::Error::new)?;
        let now = self.clock.now_ms();
        self.orchestrator.resume_from(resume_point, now)?;
        self.request_proposal().await?;
        self.drain_outbox().await?;

        info!(
            target: LOG_TARGET,
            "🗳 Consensus worker running at {}", self.orchestrator.current_slot()
        );
        loop {
            let wakeup = self.next_wakeup();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(target: LOG_TARGET, "Consensus worker shutting down");
                    break;
                },
                maybe_command = self.rx_commands.recv() => {
                    let Some(command) = maybe_command else {
                        break;
                    };
                    self.handle_command(command).await?;
                },
                _ = sleep_until(wakeup) => {
                    let now = self.clock.now_ms();
                    self.orchestrator.on_timer(now)?;
                    self.request_proposal().await?;
                    self.drain_outbox().await?;
                },
            }
        }
        Ok(())
    }

    fn next_wakeup(&self) -> Instant {
        let now = self.clock.now_ms();
        let delay = match self.orchestrator.next_deadline() {
            Some(deadline) => deadline.saturating_sub(now),
            // Housekeeping tick: pending-statement expiry still needs a pulse
            None => 1_000,
        };
        Instant::now() + Duration::from_millis(delay)
    }

    async fn handle_command(&mut self, command: ConsensusCommand) -> Result<(), ConsensusError> {
        let now = self.clock.now_ms();
        let slot_before = self.orchestrator.current_slot();
        match command {
            ConsensusCommand::Statement(statement) => {
                self.orchestrator.receive_statement(statement, now)?;
            },
            ConsensusCommand::Propose(value) => {
                self.orchestrator.propose_value(value, now)?;
            },
            ConsensusCommand::TxSetReady(hash) => {
                self.orchestrator.on_tx_set(hash, now)?;
            },
            ConsensusCommand::QuorumSetReady(qset) => {
                self.orchestrator.on_quorum_set(qset, now)?;
            },
            ConsensusCommand::LedgerCaughtUp(slot_index, value) => {
                self.orchestrator.on_ledger_caught_up(slot_index, value, now)?;
            },
            ConsensusCommand::SetValidating(validating) => {
                self.orchestrator.set_validating(validating);
            },
        }
        if self.orchestrator.current_slot() != slot_before {
            self.request_proposal().await?;
        }
        self.drain_outbox().await?;
        Ok(())
    }

    /// Ask the herder for this slot's proposal and feed it to the core.
    async fn request_proposal(&mut self) -> Result<(), ConsensusError> {
        // Without FORCE_SCP a freshly started node stays passive until it
        // hears from the network (or an explicit Propose command arrives)
        if !self.orchestrator.config().force_propose && self.orchestrator.stats().received == 0 {
            return Ok(());
        }
        let slot_index = self.orchestrator.current_slot();
        match self.herder.current_proposal(slot_index).await {
            Ok(Some(value)) => {
                let now = self.clock.now_ms();
                self.orchestrator.propose_value(value, now)?;
            },
            Ok(None) => {},
            Err(err) => {
                warn!(target: LOG_TARGET, "Herder proposal request failed for {}: {}", slot_index, err);
            },
        }
        Ok(())
    }

    /// Carries the orchestrator's accumulated effects out to the
    /// collaborators. Resolving a prerequisite can produce further effects,
    /// so this loops until the outbox stays empty.
    async fn drain_outbox(&mut self) -> Result<(), ConsensusError> {
        loop {
            let outbox = self.orchestrator.drain_outbox();
            if outbox.is_empty() {
                return Ok(());
            }
            for hash in outbox.missing_tx_sets {
                if self.herder.has_tx_set(&hash).await {
                    // The herder already holds it; close the loop ourselves
                    let now = self.clock.now_ms();
                    self.orchestrator.on_tx_set(hash, now)?;
                } else {
                    self.herder.request_tx_set(&hash).await;
                }
            }
            for hash in outbox.missing_quorum_sets {
                debug!(target: LOG_TARGET, "Waiting on overlay for quorum set {}", hash);
            }
            for statement in outbox.broadcasts {
                if let Err(err) = self.outbound.broadcast(statement).await {
                    warn!(target: LOG_TARGET, "Overlay broadcast failed: {}", err);
                }
            }
            for decided in outbox.externalized {
                let event = ConsensusEvent::Decided {
                    slot_index: decided.slot_index,
                    value: decided.value,
                };
                if let Err(err) = self.ledger.externalize(decided).await {
                    warn!(target: LOG_TARGET, "Ledger close delivery failed: {}", err);
                }
                // Nobody subscribed is fine
                let _ = self.tx_events.send(event);
            }
        }
    }
}
