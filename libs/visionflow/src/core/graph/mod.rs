// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod analytics;
mod branch;
mod builder;
#[allow(clippy::module_inception)]
mod graph;

pub use branch::{Branch, BranchId, BranchRole, BranchStatus, Outlet, StageSlot};
pub use builder::GraphBuilder;
pub use graph::{DisplayTopology, Graph, HookPoint};

pub(crate) use branch::StageInstance;
