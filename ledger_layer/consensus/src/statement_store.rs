//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Per-slot store of the latest statement of each kind from each peer.
//!
//! The insert policy is monotone in ballot order per `(sender, kind)`; a
//! stale or duplicate arrival can therefore never regress what the slot has
//! already seen, regardless of delivery order.

use std::collections::{BTreeSet, HashMap};

use log::*;
use meridian_common_types::{Ballot, NodeId};

use crate::messages::{SignedStatement, Statement, StatementKind};

const LOG_TARGET: &str = "meridian::consensus::statement_store";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Recorded,
    Stale,
}

#[derive(Debug, Default)]
pub struct StatementStore {
    latest: HashMap<(NodeId, StatementKind), SignedStatement>,
}

impl StatementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `statement` only if it is strictly greater, by ballot order,
    /// than what is already held for its `(sender, kind)`.
    pub fn insert(&mut self, statement: SignedStatement) -> InsertOutcome {
        let key = (statement.statement.from, statement.statement.kind());
        match self.latest.get(&key) {
            Some(existing) if statement.statement.ballot <= existing.statement.ballot => {
                trace!(
                    target: LOG_TARGET,
                    "Dropping stale {} (held {})",
                    statement,
                    existing.statement.ballot
                );
                InsertOutcome::Stale
            },
            _ => {
                self.latest.insert(key, statement);
                InsertOutcome::Recorded
            },
        }
    }

    pub fn get(&self, from: &NodeId, kind: StatementKind) -> Option<&SignedStatement> {
        self.latest.get(&(*from, kind))
    }

    pub fn statements(&self) -> impl Iterator<Item = &SignedStatement> {
        self.latest.values()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    /// Every sender with at least one recorded statement.
    pub fn senders(&self) -> BTreeSet<NodeId> {
        self.latest.keys().map(|(from, _)| *from).collect()
    }

    pub fn voters_for(&self, predicate: impl Fn(&Statement) -> bool) -> BTreeSet<NodeId> {
        self.latest
            .values()
            .filter(|signed| predicate(&signed.statement))
            .map(|signed| signed.statement.from)
            .collect()
    }

    /// Nodes whose statements support preparing `ballot`: a PREPARE on a
    /// compatible ballot at the same or higher counter, or any compatible
    /// CONFIRM/EXTERNALIZE (a node that confirmed or committed a value
    /// stands behind preparing it at every counter).
    pub fn nodes_that_prepared(&self, ballot: &Ballot) -> BTreeSet<NodeId> {
        self.voters_for(|statement| match statement.kind() {
            StatementKind::Prepare => {
                statement.ballot.is_compatible(ballot) && statement.ballot.counter >= ballot.counter
            },
            StatementKind::Confirm | StatementKind::Externalize => statement.ballot.is_compatible(ballot),
        })
    }

    /// Nodes whose statements support confirming `ballot`: a compatible
    /// CONFIRM at the same or higher counter, or any compatible EXTERNALIZE.
    pub fn nodes_that_confirmed(&self, ballot: &Ballot) -> BTreeSet<NodeId> {
        self.voters_for(|statement| match statement.kind() {
            StatementKind::Prepare => false,
            StatementKind::Confirm => {
                statement.ballot.is_compatible(ballot) && statement.ballot.counter >= ballot.counter
            },
            StatementKind::Externalize => statement.ballot.is_compatible(ballot),
        })
    }

    /// Nodes that externalized a value compatible with `ballot`.
    pub fn nodes_committed(&self, ballot: &Ballot) -> BTreeSet<NodeId> {
        self.voters_for(|statement| {
            statement.kind() == StatementKind::Externalize && statement.ballot.is_compatible(ballot)
        })
    }
}
