//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

use meridian_common_types::SlotIndex;

use crate::config::ConfigError;

/// Fatal consensus-core failures. Protocol-level problems (bad signatures,
/// stale ballots, missing prerequisites) are never errors; they are logged
/// and counted. An `InvariantViolation` indicates a bug in this process, not
/// a Byzantine peer, and the node must stop.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Invariant violation in {slot_index}: {details}")]
    InvariantViolation { slot_index: SlotIndex, details: String },
}
