//  Copyright 2024. The Meridian Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{fs, io, path::Path};

use anyhow::anyhow;
use async_trait::async_trait;
use futures::{future, FutureExt};
use log::*;
use meridian_consensus::{
    messages::SignedStatement,
    traits::{ConsensusSpec, StatementOutbound, SystemClock},
    worker,
    ConsensusHandle,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{config::ApplicationConfig, herder::MemoryHerder, ledger::FileLedgerEngine};

const LOG_TARGET: &str = "meridian::node::bootstrap";

/// Outbound path for a node with no peer connections. Broadcasts are logged
/// and dropped; a networked deployment swaps in the overlay writer here.
#[derive(Clone, Debug, Default)]
pub struct NullOutbound;

#[derive(Debug, thiserror::Error)]
#[error("unreachable: null outbound cannot fail")]
pub struct NullOutboundError;

#[async_trait]
impl StatementOutbound for NullOutbound {
    type Error = NullOutboundError;

    async fn broadcast(&self, statement: SignedStatement) -> Result<(), Self::Error> {
        trace!(target: LOG_TARGET, "No peers to broadcast {} to", statement);
        Ok(())
    }
}

pub struct NodeSpec;

impl ConsensusSpec for NodeSpec {
    type Clock = SystemClock;
    type Herder = MemoryHerder;
    type Ledger = FileLedgerEngine;
    type Outbound = NullOutbound;
}

pub struct Services {
    pub consensus: ConsensusHandle,
    pub herder: MemoryHerder,
    pub ledger: FileLedgerEngine,
    pub handles: Vec<JoinHandle<Result<(), anyhow::Error>>>,
}

impl Services {
    pub async fn on_any_exit(&mut self) -> Result<(), anyhow::Error> {
        // JoinHandle panics if polled again after completion; fuse to prevent
        let fused = self.handles.iter_mut().map(|handle| handle.fuse());
        let (result, _, _) = future::select_all(fused).await;
        result.unwrap_or_else(|err| Err(anyhow!("Node service panicked: {}", err)))
    }
}

pub async fn spawn_services(
    config: &ApplicationConfig,
    base_dir: &Path,
    cancel: CancellationToken,
) -> Result<Services, anyhow::Error> {
    ensure_directories_exist(base_dir)?;

    info!(target: LOG_TARGET, "Ledger store initializing");
    let ledger = FileLedgerEngine::open(base_dir.join("ledger.json"))?;

    info!(target: LOG_TARGET, "Herder initializing");
    let herder = MemoryHerder::new();

    info!(target: LOG_TARGET, "Consensus initializing");
    let consensus_config = config.to_consensus_config()?;
    let (consensus_join_handle, consensus) = worker::spawn::<NodeSpec>(
        consensus_config,
        herder.clone(),
        ledger.clone(),
        NullOutbound,
        SystemClock,
        cancel,
    )?;

    Ok(Services {
        consensus,
        herder,
        ledger,
        handles: vec![consensus_join_handle],
    })
}

fn ensure_directories_exist(base_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(base_dir)
}
