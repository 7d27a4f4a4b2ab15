// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use crate::core::metadata::{DataUnit, FrameMeta, SourceId};

/// Data moving between branches.
#[derive(Debug, Clone)]
pub enum BranchMessage {
    /// Single frame from a source branch to the mux.
    Frame(FrameMeta),
    /// Batched unit, mux onward.
    Unit(Arc<DataUnit>),
    /// `source` is set on the source-to-mux hop, `None` after batching.
    EndOfStream { source: Option<SourceId> },
}

/// Out-of-band requests from the lifecycle controller to one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Stop producing; forward end-of-stream downstream.
    EndOfStream,
    /// Exit the worker loop.
    Shutdown,
}
