// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Events posted on a graph's event channel.
//!
//! Branch workers, stages and the lifecycle controller post; the event
//! monitor is the single consumer.

use crate::core::context::StageId;
use crate::core::error::StageErrorCode;
use crate::core::graph::BranchId;
use crate::core::lifecycle::LifecycleState;

/// Who an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    /// The graph as a whole.
    Graph,
    Branch(BranchId),
    Stage(StageId),
}

impl std::fmt::Display for EventOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOrigin::Graph => f.write_str("graph"),
            EventOrigin::Branch(id) => write!(f, "{}", id),
            EventOrigin::Stage(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    StateChanged {
        origin: EventOrigin,
        old: LifecycleState,
        new: LifecycleState,
    },
    /// A stage failed. `source` is the stage (or stage child) that raised it.
    Error {
        source: StageId,
        code: StageErrorCode,
        detail: String,
    },
    /// Graph-level: every terminal branch has received end-of-stream.
    EndOfStream { origin: EventOrigin },
    Info { origin: EventOrigin, detail: String },
}

impl GraphEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GraphEvent::StateChanged { .. } => "state-changed",
            GraphEvent::Error { .. } => "error",
            GraphEvent::EndOfStream { .. } => "end-of-stream",
            GraphEvent::Info { .. } => "info",
        }
    }
}

pub type EventSender = crossbeam_channel::Sender<GraphEvent>;
pub type EventReceiver = crossbeam_channel::Receiver<GraphEvent>;
