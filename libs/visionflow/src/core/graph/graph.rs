// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::callbacks::PerfCallback;
use crate::core::context::GraphContext;
use crate::core::error::{Result, StreamError};
use crate::core::execution::{BranchWorker, ControlMessage, EosTracker, MuxSettings};
use crate::core::hooks::{HookCallback, HookHandle, HookRegistry, Port};
use crate::core::lifecycle::TransitionTracker;
use crate::core::metadata::SourceId;
use crate::core::observability::{LatencyTable, PerfCounters};

use super::branch::{Branch, BranchId, BranchRole};

/// Built-in attachment points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    /// Output of primary inference on the analytics branch.
    PostPrimaryInference,
    /// Input of the fan-out junction, after all shared analytics.
    PostSharedAnalytics,
    /// Renderer input (first sink input without rendering), per output branch.
    PreSink,
}

/// How the display side of the graph was laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayTopology {
    /// One composited output for all inputs.
    Tiled,
    /// Composited output plus one per-source output for `source_id`.
    TiledWithSplit { source_id: SourceId },
    /// One output per input with a matching sink.
    Split,
}

pub(crate) struct PerfSetup {
    pub(crate) counters: Arc<PerfCounters>,
    pub(crate) interval: Duration,
    pub(crate) callback: Option<PerfCallback>,
}

/// An assembled graph, ready to hand to a
/// [`LifecycleController`](crate::core::lifecycle::LifecycleController).
pub struct Graph {
    pub(crate) context: Arc<GraphContext>,
    pub(crate) branches: Vec<Branch>,
    pub(crate) topology: DisplayTopology,
    pub(crate) display_head: BranchId,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) hook_points: BTreeMap<HookPoint, Vec<(BranchId, Port)>>,
    pub(crate) latency: Option<Arc<LatencyTable>>,
    pub(crate) perf: Option<PerfSetup>,
    pub(crate) mux: MuxSettings,
    pub(crate) eos: Arc<EosTracker>,
    pub(crate) tracker: Arc<TransitionTracker>,
}

impl Graph {
    pub fn context(&self) -> &Arc<GraphContext> {
        &self.context
    }

    pub fn instance(&self) -> usize {
        self.context.instance()
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id() == id)
    }

    pub fn branches_with_role(&self, pred: impl Fn(&BranchRole) -> bool) -> impl Iterator<Item = &Branch> {
        self.branches.iter().filter(move |b| pred(&b.role()))
    }

    /// Tiled and per-source output branches.
    pub fn output_branches(&self) -> impl Iterator<Item = &Branch> {
        self.branches_with_role(|r| r.is_output())
    }

    pub fn source_branch(&self, source_id: SourceId) -> Option<&Branch> {
        self.branches_with_role(move |r| matches!(r, BranchRole::Source { source_id: s, .. } if *s == source_id))
            .next()
    }

    pub fn analytics_branch(&self) -> Option<&Branch> {
        self.branches_with_role(|r| *r == BranchRole::Analytics).next()
    }

    pub fn export_branch(&self) -> Option<&Branch> {
        self.branches_with_role(|r| *r == BranchRole::Export).next()
    }

    pub fn topology(&self) -> DisplayTopology {
        self.topology
    }

    /// First branch of the display side; every unit shown passes through it.
    pub fn display_head(&self) -> BranchId {
        self.display_head
    }

    pub fn mux_settings(&self) -> &MuxSettings {
        &self.mux
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Ports behind a built-in hook point, in firing order.
    pub fn hook_ports(&self, point: HookPoint) -> &[(BranchId, Port)] {
        self.hook_points.get(&point).map_or(&[], Vec::as_slice)
    }

    /// Attach `callback` at an explicit port; the port must name a stage of
    /// a non-source branch. Source branches emit single frames and run no
    /// hooks.
    pub fn attach_hook(&self, branch: BranchId, port: Port, callback: HookCallback) -> Result<HookHandle> {
        let target = self
            .branch(branch)
            .ok_or_else(|| StreamError::Hook(format!("unknown branch {}", branch)))?;
        if matches!(target.role(), BranchRole::Source { .. }) {
            return Err(StreamError::Hook(format!(
                "[{}] hooks are not supported on source branches",
                target.name()
            )));
        }
        if port.stage_index >= target.len() {
            return Err(StreamError::Hook(format!(
                "[{}] port {} out of range ({} stages)",
                target.name(),
                port,
                target.len()
            )));
        }
        Ok(self.hooks.attach(branch, port, callback))
    }

    /// Attach `callback` at every port of a built-in hook point.
    pub fn attach_at(&self, point: HookPoint, callback: HookCallback) -> Vec<HookHandle> {
        self.hook_ports(point)
            .iter()
            .map(|(branch, port)| self.hooks.attach(*branch, *port, callback.clone()))
            .collect()
    }

    pub fn detach_hook(&self, handle: &HookHandle) -> bool {
        self.hooks.detach(handle)
    }

    pub fn latency(&self) -> Option<&Arc<LatencyTable>> {
        self.latency.as_ref()
    }

    pub fn perf_counters(&self) -> Option<&Arc<PerfCounters>> {
        self.perf.as_ref().map(|p| &p.counters)
    }

    pub(crate) fn worker(&self, branch: &Branch, control: crossbeam_channel::Receiver<ControlMessage>) -> BranchWorker {
        BranchWorker {
            id: branch.id(),
            name: branch.name().to_string(),
            role: branch.role(),
            instance: self.context.instance(),
            stages: branch.stage_handle(),
            inbox: branch.receiver(),
            outlet: branch.outlet().clone(),
            control,
            status: branch.status().clone(),
            tracker: self.tracker.clone(),
            hooks: self.hooks.clone(),
            events: self.context.events(),
            eos: self.eos.clone(),
            batching: (branch.role() == BranchRole::Mux).then(|| self.mux.clone()),
            acked: Cell::new(None),
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("instance", &self.context.instance())
            .field("topology", &self.topology)
            .field("branches", &self.branches)
            .field("hooks", &self.hooks)
            .finish()
    }
}
