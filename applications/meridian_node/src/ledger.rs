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

//! Ledger-close engine backed by a JSON last-closed record.
//!
//! Applies externalized values by recording the new last-closed ledger and
//! persisting it, which is also the consensus resume point after a restart.
//! Bucket storage, history archival and replay live outside this node.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use log::*;
use meridian_common_types::{LedgerValue, SlotIndex};
use meridian_consensus::{orchestrator::ExternalizedValue, traits::LedgerCloseEngine};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const LOG_TARGET: &str = "meridian::node::ledger";

#[derive(Debug, thiserror::Error)]
pub enum LedgerStoreError {
    #[error("Ledger store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt ledger store: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LastClosedRecord {
    slot_index: u64,
    value: LedgerValue,
    /// Hex-encoded wire bytes of the EXTERNALIZE statements that backed the
    /// decision.
    proof: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct FileLedgerEngine {
    path: PathBuf,
    state: Arc<Mutex<Option<LastClosedRecord>>>,
}

impl FileLedgerEngine {
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, LedgerStoreError> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => {
                let record: LastClosedRecord = serde_json::from_slice(&bytes)?;
                info!(
                    target: LOG_TARGET,
                    "Resuming from last closed slot {} -> {}", record.slot_index, record.value
                );
                Some(record)
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    fn persist(path: &Path, record: &LastClosedRecord) -> Result<(), LedgerStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash mid-write cannot corrupt the record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerCloseEngine for FileLedgerEngine {
    type Error = LedgerStoreError;

    async fn externalize(&self, decided: ExternalizedValue) -> Result<(), Self::Error> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.as_ref() {
            if decided.slot_index.as_u64() <= existing.slot_index {
                // Repeat delivery of an already-applied slot is fine
                debug!(
                    target: LOG_TARGET,
                    "Ignoring repeat externalize for slot {}", decided.slot_index
                );
                return Ok(());
            }
        }
        info!(
            target: LOG_TARGET,
            "📒 Closing ledger at {} with {}", decided.slot_index, decided.value
        );
        let record = LastClosedRecord {
            slot_index: decided.slot_index.as_u64(),
            value: decided.value,
            proof: decided
                .proof
                .iter()
                .map(|statement| hex::encode(statement.to_wire_bytes()))
                .collect(),
        };
        Self::persist(&self.path, &record)?;
        *state = Some(record);
        Ok(())
    }

    async fn last_committed(&self) -> Result<Option<(SlotIndex, LedgerValue)>, Self::Error> {
        let state = self.state.lock().await;
        Ok(state.as_ref().map(|record| (SlotIndex(record.slot_index), record.value)))
    }
}
