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

use log::*;
use meridian_common_types::LedgerHash;
use meridian_consensus::ConsensusEvent;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::Services;

const LOG_TARGET: &str = "meridian::node::app";

pub struct MeridianNode {
    services: Services,
}

impl MeridianNode {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub async fn start(mut self, cancel: CancellationToken) -> Result<(), anyhow::Error> {
        let mut decisions = self.services.consensus.subscribe();

        loop {
            tokio::select! {
                // Spin until shutdown is requested
                _ = cancel.cancelled() => {
                    break;
                },

                result = decisions.recv() => {
                    match result {
                        Ok(ConsensusEvent::Decided { slot_index, value }) => {
                            info!(target: LOG_TARGET, "⛓ Decided {} -> {}", slot_index, value);
                            // The decided value closes a new ledger; chain the
                            // herder's next proposal on it
                            let closed = LedgerHash::from(value.hash().into_array());
                            self.services.herder.set_last_ledger(closed).await;
                        },
                        Err(err) => {
                            warn!(target: LOG_TARGET, "Decision stream lagging: {}", err);
                        },
                    }
                },

                result = self.services.on_any_exit() => {
                    result?;
                    return Err(anyhow::anyhow!("A node service exited unexpectedly"));
                },
            }
        }

        Ok(())
    }
}
