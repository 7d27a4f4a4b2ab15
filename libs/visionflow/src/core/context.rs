// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-graph context shared by the builder, branch workers, the event
//! monitor and the lifecycle controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::events::{EventReceiver, EventSender, GraphEvent};
use crate::core::graph::BranchId;
use crate::core::monitor::ShutdownSignal;

/// Upper bound on parent hops when resolving a stage to its branch.
pub const MAX_ANCESTOR_DEPTH: usize = 16;

/// Identity of one stage instance (or of a child a stage registered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(u64);

impl StageId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageParent {
    Branch(BranchId),
    Stage(StageId),
}

#[derive(Debug, Clone)]
struct DirectoryEntry {
    name: String,
    parent: StageParent,
}

/// Registry of every stage id in a graph and its parent.
///
/// Errors name the stage that raised them; the monitor walks parents from
/// there to find the owning branch.
#[derive(Debug, Default)]
pub struct StageDirectory {
    entries: RwLock<HashMap<StageId, DirectoryEntry>>,
    next_id: AtomicU64,
}

impl StageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, name: impl Into<String>, parent: StageParent) -> StageId {
        let id = StageId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().insert(
            id,
            DirectoryEntry {
                name: name.into(),
                parent,
            },
        );
        id
    }

    pub fn remove(&self, id: StageId) {
        self.entries.write().remove(&id);
    }

    pub fn name(&self, id: StageId) -> Option<String> {
        self.entries.read().get(&id).map(|e| e.name.clone())
    }

    pub fn parent(&self, id: StageId) -> Option<StageParent> {
        self.entries.read().get(&id).map(|e| e.parent)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Walk parents from `id` until a branch owns it, giving up after
    /// [`MAX_ANCESTOR_DEPTH`] hops or at an unknown id.
    pub fn owning_branch(&self, id: StageId) -> Option<BranchId> {
        let entries = self.entries.read();
        let mut current = id;
        for _ in 0..MAX_ANCESTOR_DEPTH {
            match entries.get(&current)?.parent {
                StageParent::Branch(branch) => return Some(branch),
                StageParent::Stage(parent) => current = parent,
            }
        }
        tracing::warn!(
            "[{}] ancestor walk exceeded {} levels",
            id,
            MAX_ANCESTOR_DEPTH
        );
        None
    }
}

/// Shared state for one graph instance.
pub struct GraphContext {
    instance: usize,
    events_tx: EventSender,
    events_rx: EventReceiver,
    directory: Arc<StageDirectory>,
    shutdown: Arc<ShutdownSignal>,
}

impl GraphContext {
    pub fn new(instance: usize) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            instance,
            events_tx,
            events_rx,
            directory: Arc::new(StageDirectory::new()),
            shutdown: Arc::new(ShutdownSignal::new()),
        }
    }

    /// Index of this graph among the instances a process runs.
    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn events(&self) -> EventSender {
        self.events_tx.clone()
    }

    pub(crate) fn event_receiver(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    pub fn post(&self, event: GraphEvent) {
        // The receiver lives as long as the context.
        let _ = self.events_tx.send(event);
    }

    pub fn directory(&self) -> &Arc<StageDirectory> {
        &self.directory
    }

    pub fn shutdown(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }
}

impl std::fmt::Debug for GraphContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphContext")
            .field("instance", &self.instance)
            .field("stages", &self.directory.len())
            .field("pending_events", &self.events_rx.len())
            .finish()
    }
}
