// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod annotate;
pub mod callbacks;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod execution;
pub mod export;
pub mod graph;
pub mod hooks;
pub mod lifecycle;
pub mod metadata;
pub mod monitor;
pub mod observability;
pub mod stages;

pub use annotate::*;
pub use callbacks::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use events::*;
pub use execution::{BranchMessage, ControlMessage, MuxSettings};
pub use export::*;
pub use graph::*;
pub use hooks::*;
pub use lifecycle::*;
pub use metadata::*;
pub use monitor::*;
pub use observability::*;
pub use stages::*;
