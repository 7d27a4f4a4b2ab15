// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod batcher;
mod eos;
mod messages;
mod thread_runner;

pub use batcher::MuxSettings;
pub use messages::{BranchMessage, ControlMessage};

pub(crate) use eos::EosTracker;
pub(crate) use thread_runner::{BranchWorker, run_branch_loop};
