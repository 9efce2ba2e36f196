//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

//! End-to-end consensus scenarios over an in-memory network of orchestrator
//! instances, plus a smoke test of the async worker service.

pub mod support;

#[cfg(test)]
mod consensus;
#[cfg(test)]
mod service;
