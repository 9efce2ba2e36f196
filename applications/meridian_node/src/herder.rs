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

//! In-process transaction-set herder.
//!
//! Collects submitted payment blobs, freezes them into a transaction set
//! per slot, and answers the consensus core's availability queries. This is
//! the collaborator stand-in for single-node and development operation; a
//! networked deployment puts the overlay-fed herder behind the same trait.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use log::*;
use meridian_common_types::{
    hashing::{ConsensusHasher, TX_SET_DOMAIN},
    LedgerHash,
    LedgerValue,
    SlotIndex,
    TxSetHash,
};
use meridian_consensus::traits::TxSetHerder;
use tokio::sync::Mutex;

const LOG_TARGET: &str = "meridian::node::herder";

#[derive(Debug, thiserror::Error)]
pub enum HerderError {
    #[error("No transaction set for hash {0}")]
    UnknownTxSet(TxSetHash),
}

#[derive(Debug, Default)]
struct HerderState {
    collecting: Vec<Vec<u8>>,
    tx_sets: HashMap<TxSetHash, Vec<Vec<u8>>>,
    proposals: HashMap<u64, LedgerValue>,
    last_ledger: LedgerHash,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryHerder {
    inner: Arc<Mutex<HerderState>>,
}

impl MemoryHerder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw transaction for the next proposal.
    pub async fn submit_transaction(&self, raw: Vec<u8>) {
        let mut state = self.inner.lock().await;
        state.collecting.push(raw);
    }

    /// The previous decided ledger, mixed into every later proposal.
    pub async fn set_last_ledger(&self, hash: LedgerHash) {
        let mut state = self.inner.lock().await;
        state.last_ledger = hash;
        // Proposals chained on the old ledger are obsolete
        state.proposals.clear();
    }

    pub async fn tx_set(&self, hash: &TxSetHash) -> Result<Vec<Vec<u8>>, HerderError> {
        let state = self.inner.lock().await;
        state.tx_sets.get(hash).cloned().ok_or(HerderError::UnknownTxSet(*hash))
    }

    fn hash_tx_set(transactions: &[Vec<u8>]) -> TxSetHash {
        let mut hasher = ConsensusHasher::new(TX_SET_DOMAIN);
        hasher.update(&(transactions.len() as u64).to_be_bytes());
        for tx in transactions {
            hasher.update(&(tx.len() as u64).to_be_bytes());
            hasher.update(tx);
        }
        hasher.finalize().into()
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl TxSetHerder for MemoryHerder {
    type Error = HerderError;

    /// Freezes the currently collecting transactions into this slot's
    /// proposal. Repeated calls for the same slot return the same value.
    async fn current_proposal(&self, slot_index: SlotIndex) -> Result<Option<LedgerValue>, Self::Error> {
        let mut state = self.inner.lock().await;
        if let Some(existing) = state.proposals.get(&slot_index.as_u64()) {
            return Ok(Some(*existing));
        }
        let transactions = std::mem::take(&mut state.collecting);
        let tx_set_hash = Self::hash_tx_set(&transactions);
        debug!(
            target: LOG_TARGET,
            "Proposing tx set {} ({} tx(s)) for {}",
            tx_set_hash,
            transactions.len(),
            slot_index
        );
        state.tx_sets.insert(tx_set_hash, transactions);
        let value = LedgerValue::new(state.last_ledger, tx_set_hash, Self::now_ms());
        state.proposals.insert(slot_index.as_u64(), value);
        Ok(Some(value))
    }

    async fn has_tx_set(&self, hash: &TxSetHash) -> bool {
        self.inner.lock().await.tx_sets.contains_key(hash)
    }

    async fn request_tx_set(&self, hash: &TxSetHash) {
        // No overlay to fetch from in-process; the peer that referenced the
        // set will re-announce it
        warn!(target: LOG_TARGET, "Tx set {} referenced but not held locally", hash);
    }
}
