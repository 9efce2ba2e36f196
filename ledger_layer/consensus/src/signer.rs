//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Turns slot-machine drafts into signed statements from this replica.
//!
//! The signer is the only component that can originate a statement, and the
//! `validating` gate lives here: a non-validating replica participates in
//! every other way but this method returns `None`.

use log::*;
use meridian_common_types::{FixedHash, NodeId, NodeKeypair, QuorumSetHash};

use crate::messages::{signing_domain, SignedStatement, Statement, StatementDraft};

const LOG_TARGET: &str = "meridian::consensus::signer";

#[derive(Debug)]
pub struct LocalSigner {
    keypair: NodeKeypair,
    qset_hash: QuorumSetHash,
    validating: bool,
    signing_domain: FixedHash,
}

impl LocalSigner {
    pub fn new(keypair: NodeKeypair, qset_hash: QuorumSetHash, validating: bool, network_passphrase: &str) -> Self {
        Self {
            keypair,
            qset_hash,
            validating,
            signing_domain: signing_domain(network_passphrase),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.keypair.node_id()
    }

    pub fn qset_hash(&self) -> QuorumSetHash {
        self.qset_hash
    }

    pub fn signing_domain(&self) -> &FixedHash {
        &self.signing_domain
    }

    pub fn is_validating(&self) -> bool {
        self.validating
    }

    pub fn set_validating(&mut self, validating: bool) {
        if self.validating != validating {
            info!(target: LOG_TARGET, "Validator mode {}", if validating { "enabled" } else { "disabled" });
        }
        self.validating = validating;
    }

    /// Signs and stamps a draft with this replica's identity and quorum-set
    /// reference. No-op unless validating.
    pub fn emit(&self, draft: StatementDraft) -> Option<SignedStatement> {
        if !self.validating {
            trace!(target: LOG_TARGET, "Suppressing emission, not a validator");
            return None;
        }
        let statement = Statement {
            slot_index: draft.slot_index,
            from: self.keypair.node_id(),
            qset_hash: self.qset_hash,
            ballot: draft.ballot,
            value: draft.value,
            payload: draft.payload,
        };
        Some(statement.sign(&self.keypair, &self.signing_domain))
    }
}
