// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Branches: linear runs of stages with one entry and one exit.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::core::config::SourceType;
use crate::core::context::StageId;
use crate::core::execution::BranchMessage;
use crate::core::lifecycle::BranchState;
use crate::core::metadata::SourceId;
use crate::core::stages::{Stage, StageKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(u32);

impl BranchId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "branch#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchRole {
    /// Ingests one input and feeds the mux.
    Source {
        source_id: SourceId,
        source_type: SourceType,
    },
    /// Batches frames from every source.
    Mux,
    /// Inference, tracking, message conversion; ends in the fan-out junction.
    Analytics,
    /// Duplicates units to the tiled branch and the splitter.
    DisplayJunction,
    /// Composites all inputs into one output.
    Tiled,
    /// Routes each frame of a batch to its per-source branch.
    Splitter,
    /// Output for a single input.
    PerSource { source_id: SourceId },
    /// Message broker output fed from the fan-out junction.
    Export,
}

impl BranchRole {
    /// Errors on this branch are recovered by resetting it in place.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BranchRole::Source { source_type, .. } if source_type.is_recoverable())
    }

    pub fn is_camera(&self) -> bool {
        matches!(
            self,
            BranchRole::Source {
                source_type: SourceType::Camera,
                ..
            }
        )
    }

    /// Display outputs: the tiled branch and per-source branches.
    pub fn is_output(&self) -> bool {
        matches!(self, BranchRole::Tiled | BranchRole::PerSource { .. })
    }

    pub fn source_id(&self) -> Option<SourceId> {
        match self {
            BranchRole::Source { source_id, .. } | BranchRole::PerSource { source_id } => {
                Some(*source_id)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchRole::Source { .. } => "source",
            BranchRole::Mux => "mux",
            BranchRole::Analytics => "analytics",
            BranchRole::DisplayJunction => "display_junction",
            BranchRole::Tiled => "tiled",
            BranchRole::Splitter => "splitter",
            BranchRole::PerSource { .. } => "per_source",
            BranchRole::Export => "export",
        }
    }
}

/// A stage owned by a branch.
pub struct StageInstance {
    pub(crate) id: StageId,
    pub(crate) kind: StageKind,
    pub(crate) name: String,
    pub(crate) stage: Box<dyn Stage>,
}

impl StageInstance {
    pub(crate) fn new(id: StageId, kind: StageKind, name: String, stage: Box<dyn Stage>) -> Self {
        Self {
            id,
            kind,
            name,
            stage,
        }
    }
}

/// Lock-free view of one stage slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSlot {
    pub id: StageId,
    pub kind: StageKind,
    pub name: String,
}

/// Where a branch sends units after its last stage.
#[derive(Debug, Clone, Default)]
pub enum Outlet {
    /// Output branch; units end here.
    #[default]
    Terminal,
    Forward(Sender<BranchMessage>),
    /// Same units to every consumer, in production order.
    FanOut(Vec<Sender<BranchMessage>>),
    /// Each frame to the branch of its source; sources with no branch are dropped.
    Split(BTreeMap<SourceId, Sender<BranchMessage>>),
}

impl Outlet {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outlet::Terminal)
    }

    pub fn consumers(&self) -> usize {
        match self {
            Outlet::Terminal => 0,
            Outlet::Forward(_) => 1,
            Outlet::FanOut(txs) => txs.len(),
            Outlet::Split(map) => map.len(),
        }
    }
}

/// Runtime status shared between a branch worker, the controller and the
/// monitor.
#[derive(Debug, Default)]
pub struct BranchStatus {
    state: AtomicU8,
    recovering: AtomicBool,
    pending_resets: AtomicU64,
    resets: AtomicU64,
    shutdown: AtomicBool,
}

impl BranchStatus {
    pub fn state(&self) -> BranchState {
        BranchState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: BranchState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Mark recovery in progress. False when one is already running.
    pub(crate) fn try_begin_recovery(&self) -> bool {
        self.recovering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Add a reset on top of one already in progress.
    pub(crate) fn join_recovery(&self) {
        self.pending_resets.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by each reset when done; the branch stops recovering once the
    /// last one finishes.
    pub(crate) fn finish_recovery(&self) {
        self.resets.fetch_add(1, Ordering::AcqRel);
        let joined = self
            .pending_resets
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if joined.is_err() {
            self.recovering.store(false, Ordering::Release);
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }

    /// Completed resets since the graph was built.
    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

pub struct Branch {
    id: BranchId,
    name: String,
    role: BranchRole,
    slots: Vec<StageSlot>,
    stages: Arc<Mutex<Vec<StageInstance>>>,
    inbox_tx: Sender<BranchMessage>,
    inbox_rx: Receiver<BranchMessage>,
    outlet: Outlet,
    status: Arc<BranchStatus>,
}

impl Branch {
    pub(crate) fn new(id: BranchId, name: impl Into<String>, role: BranchRole, queue_capacity: usize) -> Self {
        let (inbox_tx, inbox_rx) = crossbeam_channel::bounded(queue_capacity);
        Self {
            id,
            name: name.into(),
            role,
            slots: Vec::new(),
            stages: Arc::new(Mutex::new(Vec::new())),
            inbox_tx,
            inbox_rx,
            outlet: Outlet::Terminal,
            status: Arc::new(BranchStatus::default()),
        }
    }

    pub fn id(&self) -> BranchId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> BranchRole {
        self.role
    }

    pub fn stages(&self) -> &[StageSlot] {
        &self.slots
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.slots.iter().map(|s| s.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Index of the first stage of `kind`.
    pub fn position(&self, kind: StageKind) -> Option<usize> {
        self.slots.iter().position(|s| s.kind == kind)
    }

    pub fn state(&self) -> BranchState {
        self.status.state()
    }

    pub fn status(&self) -> &Arc<BranchStatus> {
        &self.status
    }

    pub fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    /// Append a stage at the exit end of the branch.
    pub(crate) fn link_into(&mut self, instance: StageInstance) {
        self.slots.push(StageSlot {
            id: instance.id,
            kind: instance.kind,
            name: instance.name.clone(),
        });
        self.stages.lock().push(instance);
    }

    /// Remove a stage, returning it so the caller can stop it.
    pub(crate) fn detach(&mut self, id: StageId) -> Option<StageInstance> {
        let index = self.slots.iter().position(|s| s.id == id)?;
        self.slots.remove(index);
        let mut stages = self.stages.lock();
        let pos = stages.iter().position(|s| s.id == id)?;
        Some(stages.remove(pos))
    }

    pub(crate) fn stage_handle(&self) -> Arc<Mutex<Vec<StageInstance>>> {
        self.stages.clone()
    }

    pub(crate) fn sender(&self) -> Sender<BranchMessage> {
        self.inbox_tx.clone()
    }

    pub(crate) fn receiver(&self) -> Receiver<BranchMessage> {
        self.inbox_rx.clone()
    }

    pub(crate) fn set_outlet(&mut self, outlet: Outlet) {
        self.outlet = outlet;
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("stages", &self.stage_kinds())
            .field("consumers", &self.outlet.consumers())
            .finish()
    }
}
