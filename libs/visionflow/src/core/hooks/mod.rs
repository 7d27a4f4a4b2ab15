// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Hook points on branch ports.
//!
//! A hook is a callback attached to one port of one branch. Callbacks on a
//! port fire in attachment order, synchronously on the branch worker, and
//! each visits a given data unit at most once. Mutation hooks only see the
//! batch metadata, and are skipped when the unit is shared with another
//! consumer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::graph::BranchId;
use crate::core::metadata::{BatchMeta, DataUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortDirection {
    /// Before the stage processes the unit.
    Input,
    /// After the stage processed the unit.
    Output,
}

/// Position on a branch: the input or output side of one stage.
///
/// Ports order by position along the branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port {
    pub stage_index: usize,
    pub direction: PortDirection,
}

impl Port {
    pub fn input(stage_index: usize) -> Self {
        Self {
            stage_index,
            direction: PortDirection::Input,
        }
    }

    pub fn output(stage_index: usize) -> Self {
        Self {
            stage_index,
            direction: PortDirection::Output,
        }
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.direction {
            PortDirection::Input => "in",
            PortDirection::Output => "out",
        };
        write!(f, "{}:{}", self.stage_index, side)
    }
}

/// Context passed to every hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookInfo {
    pub branch: BranchId,
    pub port: Port,
    /// Source id for per-source branches, 0 elsewhere.
    pub index: usize,
    pub sequence: u64,
}

pub type ObserveFn = dyn Fn(&DataUnit, &HookInfo) + Send + Sync;
pub type MutateFn = dyn Fn(&mut BatchMeta, &HookInfo) + Send + Sync;

#[derive(Clone)]
pub enum HookCallback {
    /// Read-only access to the whole unit. Always runs.
    Observe(Arc<ObserveFn>),
    /// Write access to metadata. Runs only when the unit is not shared.
    Mutate(Arc<MutateFn>),
}

impl HookCallback {
    pub fn observe<F>(f: F) -> Self
    where
        F: Fn(&DataUnit, &HookInfo) + Send + Sync + 'static,
    {
        HookCallback::Observe(Arc::new(f))
    }

    pub fn mutate<F>(f: F) -> Self
    where
        F: Fn(&mut BatchMeta, &HookInfo) + Send + Sync + 'static,
    {
        HookCallback::Mutate(Arc::new(f))
    }
}

impl std::fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookCallback::Observe(_) => f.write_str("HookCallback::Observe"),
            HookCallback::Mutate(_) => f.write_str("HookCallback::Mutate"),
        }
    }
}

/// Returned by attach; pass to detach to remove the hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle {
    id: u64,
    branch: BranchId,
    port: Port,
}

impl HookHandle {
    pub fn branch(&self) -> BranchId {
        self.branch
    }

    pub fn port(&self) -> Port {
        self.port
    }
}

struct HookEntry {
    id: u64,
    callback: HookCallback,
    /// One past the highest sequence this hook has visited.
    visited_until: AtomicU64,
}

impl HookEntry {
    /// Claim `sequence` for this hook. False when already visited.
    fn claim(&self, sequence: u64) -> bool {
        self.visited_until
            .fetch_max(sequence.saturating_add(1), Ordering::AcqRel)
            <= sequence
    }
}

#[derive(Default)]
pub struct HookRegistry {
    points: RwLock<BTreeMap<(BranchId, Port), Vec<Arc<HookEntry>>>>,
    next_id: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the hooks on `(branch, port)`.
    pub fn attach(&self, branch: BranchId, port: Port, callback: HookCallback) -> HookHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(HookEntry {
            id,
            callback,
            visited_until: AtomicU64::new(0),
        });
        self.points
            .write()
            .entry((branch, port))
            .or_default()
            .push(entry);
        tracing::debug!("[{}] hook {} attached at {}", branch, id, port);
        HookHandle { id, branch, port }
    }

    /// Remove a hook. Returns false when it was already detached.
    pub fn detach(&self, handle: &HookHandle) -> bool {
        let mut points = self.points.write();
        let key = (handle.branch, handle.port);
        let Some(entries) = points.get_mut(&key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != handle.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            points.remove(&key);
        }
        removed
    }

    pub fn count(&self, branch: BranchId, port: Port) -> usize {
        self.points
            .read()
            .get(&(branch, port))
            .map_or(0, |entries| entries.len())
    }

    /// Ports on `branch` that carry at least one hook, in port order.
    pub fn ports(&self, branch: BranchId) -> Vec<Port> {
        self.points
            .read()
            .keys()
            .filter(|(b, _)| *b == branch)
            .map(|(_, port)| *port)
            .collect()
    }

    /// Run the hooks on `(branch, port)` for `unit`.
    pub(crate) fn fire(&self, branch: BranchId, port: Port, index: usize, unit: &mut Arc<DataUnit>) {
        // Snapshot so callbacks can attach or detach without deadlocking.
        let entries = match self.points.read().get(&(branch, port)) {
            Some(entries) => entries.clone(),
            None => return,
        };

        let info = HookInfo {
            branch,
            port,
            index,
            sequence: unit.sequence(),
        };

        for entry in entries {
            if !entry.claim(info.sequence) {
                tracing::trace!(
                    "[{}] hook {} already visited unit {}",
                    branch,
                    entry.id,
                    info.sequence
                );
                continue;
            }
            match &entry.callback {
                HookCallback::Observe(f) => f(&**unit, &info),
                HookCallback::Mutate(f) => match Arc::get_mut(unit) {
                    Some(unit) => f(unit.metadata_mut(), &info),
                    None => tracing::trace!(
                        "[{}] unit {} shared at {}, skipping mutation hook {}",
                        branch,
                        info.sequence,
                        port,
                        entry.id
                    ),
                },
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let points = self.points.read();
        f.debug_struct("HookRegistry")
            .field("points", &points.len())
            .field("hooks", &points.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
