// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod controller;
mod state;
mod transition;

pub use controller::LifecycleController;
pub use state::{BranchState, LifecycleAction, LifecycleState};

pub(crate) use transition::TransitionTracker;
