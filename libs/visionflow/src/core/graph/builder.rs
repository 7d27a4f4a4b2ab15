// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Graph assembly from a [`GraphConfig`].
//!
//! Layout, upstream to downstream:
//!
//! ```text
//! source_bin_N ─┐
//!               ├─> mux ─> analytics (… ─> tee) ─┬─> display head
//! source_bin_M ─┘                                └─> export
//! ```
//!
//! The display head depends on the tiled display mode: the tiled branch,
//! a display junction feeding the tiled branch and a splitter, or a
//! splitter alone feeding per-source outputs. Without analytics the mux
//! feeds the display head directly.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::annotate::{AnnotationSettings, annotate};
use crate::core::callbacks::GraphCallbacks;
use crate::core::config::{GraphConfig, SinkConfig, SourceType, TiledDisplayMode};
use crate::core::context::{GraphContext, StageParent};
use crate::core::error::BuildError;
use crate::core::execution::{EosTracker, MuxSettings};
use crate::core::export::{KittiKind, KittiWriter};
use crate::core::hooks::{HookCallback, HookRegistry, Port};
use crate::core::lifecycle::TransitionTracker;
use crate::core::metadata::SourceId;
use crate::core::observability::{LatencyTable, PerfCounters};
use crate::core::stages::{StageConfig, StageContext, StageFactory, StageKind, StageState};

use super::analytics::AnalyticsChain;
use super::branch::{Branch, BranchId, BranchRole, Outlet, StageInstance};
use super::graph::{DisplayTopology, Graph, HookPoint, PerfSetup};

pub struct GraphBuilder {
    factory: Arc<dyn StageFactory>,
    callbacks: GraphCallbacks,
    instance: usize,
}

impl GraphBuilder {
    pub fn new(factory: Arc<dyn StageFactory>) -> Self {
        Self {
            factory,
            callbacks: GraphCallbacks::default(),
            instance: 0,
        }
    }

    pub fn with_callbacks(mut self, callbacks: GraphCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Index of this graph among the instances one process runs; used in
    /// thread names, performance samples and export file names.
    pub fn with_instance_index(mut self, instance: usize) -> Self {
        self.instance = instance;
        self
    }

    pub fn build(&self, config: &GraphConfig) -> Result<Graph, BuildError> {
        validate(config)?;

        let context = Arc::new(GraphContext::new(self.instance));
        let mut assembly = Assembly {
            context: context.clone(),
            factory: self.factory.clone(),
            branches: Vec::new(),
        };

        match assembly.assemble(config) {
            Ok(plan) => {
                tracing::info!(
                    "[graph-{}] built {} branches ({:?})",
                    self.instance,
                    assembly.branches.len(),
                    plan.topology
                );
                Ok(self.finish(context, assembly.branches, plan, config))
            }
            Err(e) => {
                tracing::error!("[graph-{}] build failed: {}", self.instance, e);
                assembly.unwind();
                Err(e)
            }
        }
    }

    fn finish(
        &self,
        context: Arc<GraphContext>,
        branches: Vec<Branch>,
        plan: Plan,
        config: &GraphConfig,
    ) -> Graph {
        let statuses = branches.iter().map(|b| b.status().clone()).collect();
        let tracker = Arc::new(TransitionTracker::new(statuses, context.events()));
        let terminals: BTreeSet<BranchId> = branches
            .iter()
            .filter(|b| b.outlet().consumers() == 0)
            .map(|b| b.id())
            .collect();
        let eos = Arc::new(EosTracker::new(terminals, context.events()));

        let mut graph = Graph {
            context,
            branches,
            topology: plan.topology,
            display_head: plan.display_head,
            hooks: Arc::new(HookRegistry::new()),
            hook_points: plan.hook_points,
            latency: None,
            perf: None,
            mux: plan.mux,
            eos,
            tracker,
        };
        self.attach_builtin_hooks(&mut graph, config);
        graph
    }

    /// Built-in hooks, attached before any application hook so they fire first.
    fn attach_builtin_hooks(&self, graph: &mut Graph, config: &GraphConfig) {
        let instance = graph.instance();

        if let Some(dir) = &config.kitti.detection_dir {
            let writer = KittiWriter::new(dir, instance, KittiKind::Detection);
            graph.attach_at(HookPoint::PostPrimaryInference, kitti_hook(writer));
        }
        if let Some(dir) = config.kitti.tracking_dir.as_ref().filter(|_| config.tracker_enabled()) {
            let writer = KittiWriter::new(dir, instance, KittiKind::Tracking);
            graph.attach_at(HookPoint::PostSharedAnalytics, kitti_hook(writer));
        }
        if let Some(callback) = self.callbacks.on_shared_analytics_done.clone() {
            graph.attach_at(
                HookPoint::PostSharedAnalytics,
                HookCallback::observe(move |unit, info| callback(unit, info.index)),
            );
        }

        let settings = Arc::new(AnnotationSettings::from_config(config));
        graph.attach_at(
            HookPoint::PreSink,
            HookCallback::mutate(move |meta, _| annotate(meta, &settings)),
        );
        if let Some(callback) = self.callbacks.on_per_output_ready.clone() {
            graph.attach_at(
                HookPoint::PreSink,
                HookCallback::mutate(move |meta, info| callback(meta, info)),
            );
        }
        if let Some(callback) = self.callbacks.on_overlay.clone() {
            graph.attach_at(
                HookPoint::PreSink,
                HookCallback::mutate(move |meta, info| callback(meta, info)),
            );
        }

        if config.latency_measurement {
            let max_id = config.enabled_sources().map(|(id, _)| id as usize + 1).max().unwrap_or(0);
            let table = Arc::new(LatencyTable::new(graph.mux.batch_size.max(max_id)));
            let ports: Vec<_> = graph
                .output_branches()
                .filter_map(|b| b.position(StageKind::Sink).map(|i| (b.id(), Port::input(i))))
                .collect();
            for (branch, port) in ports {
                let table = table.clone();
                graph.hooks.attach(
                    branch,
                    port,
                    HookCallback::observe(move |unit, _| {
                        table.record(unit, Instant::now());
                    }),
                );
            }
            graph.latency = Some(table);
        }

        if config.performance.enable {
            let sources = config.enabled_sources().map(|(id, _)| id).collect();
            let counters = Arc::new(PerfCounters::new(sources));
            let c = counters.clone();
            graph.hooks.attach(
                graph.display_head,
                Port::input(0),
                HookCallback::observe(move |unit, _| c.record(unit)),
            );
            graph.perf = Some(PerfSetup {
                counters,
                interval: Duration::from_secs(config.performance.interval_sec.max(1)),
                callback: self.callbacks.on_performance_sample.clone(),
            });
        }
    }
}

fn kitti_hook(writer: KittiWriter) -> HookCallback {
    HookCallback::observe(move |unit, _| {
        if let Err(e) = writer.write_unit(unit) {
            tracing::warn!("[kitti] write to {} failed: {}", writer.dir().display(), e);
        }
    })
}

fn validate(config: &GraphConfig) -> Result<(), BuildError> {
    let limits = &config.limits;
    let checks = [
        ("sources", config.sources.len(), limits.max_sources),
        ("sinks", config.sinks.len(), limits.max_sinks),
        (
            "secondary inference stages",
            config.secondary_inference.len(),
            limits.max_secondary_inference,
        ),
    ];
    for (what, requested, limit) in checks {
        if requested > limit {
            return Err(BuildError::CapacityExceeded {
                what,
                requested,
                limit,
            });
        }
    }

    let mut seen = BTreeSet::new();
    for (id, _) in config.enabled_sources() {
        if id as usize >= limits.max_sources {
            return Err(BuildError::InvalidConfig(format!(
                "source id {} out of range, must be below {}",
                id, limits.max_sources
            )));
        }
        if !seen.insert(id) {
            return Err(BuildError::InvalidConfig(format!("duplicate source id {}", id)));
        }
    }
    if seen.is_empty() {
        return Err(BuildError::NoSources);
    }

    if !AnalyticsChain::wanted(config) {
        if let Some((index, _)) = config.sinks.iter().enumerate().find(|(_, s)| s.enable && s.is_export()) {
            return Err(BuildError::ExportWithoutAnalytics {
                sink: format!("sink_{}", index),
            });
        }
    }
    Ok(())
}

/// What assembly decided, beyond the branches themselves.
struct Plan {
    topology: DisplayTopology,
    display_head: BranchId,
    hook_points: BTreeMap<HookPoint, Vec<(BranchId, Port)>>,
    mux: MuxSettings,
}

/// Branches created so far; unwound when assembly fails.
struct Assembly {
    context: Arc<GraphContext>,
    factory: Arc<dyn StageFactory>,
    branches: Vec<Branch>,
}

impl Assembly {
    fn assemble(&mut self, config: &GraphConfig) -> Result<Plan, BuildError> {
        let capacity = config.limits.queue_capacity.max(1);
        let live = config.mux.live_source;
        let sources: Vec<_> = config.enabled_sources().collect();
        let mut hook_points: BTreeMap<HookPoint, Vec<(BranchId, Port)>> = BTreeMap::new();

        // Mux first so sources can link to it.
        let mux_settings = MuxSettings {
            batch_size: config.effective_batch_size(),
            batch_timeout: Duration::from_millis(config.mux.batch_timeout_ms),
            sources: sources.iter().map(|(id, _)| *id).collect(),
        };
        let mux = self.add_branch("mux", BranchRole::Mux, capacity);
        self.add_stage(
            mux,
            StageConfig::new(StageKind::Mux, "mux")
                .with_params(config.mux.params.clone())
                .with_param("batch_size", mux_settings.batch_size as u64)
                .with_param("batch_timeout_ms", config.mux.batch_timeout_ms)
                .with_param("width", config.mux.width)
                .with_param("height", config.mux.height)
                .with_param("live_source", live),
        )?;
        let mux_tx = self.branch(mux).sender();

        for (id, source) in &sources {
            let branch = self.add_branch(
                format!("source_bin_{}", id),
                BranchRole::Source {
                    source_id: *id,
                    source_type: source.source_type,
                },
                capacity,
            );
            let looping = source.loop_playback || config.file_loop;
            self.add_stage(
                branch,
                StageConfig::new(StageKind::Source, format!("source_bin_{}", id))
                    .with_target(*id)
                    .with_params(source.params.clone())
                    .with_param("type", source.source_type.as_str())
                    .with_param("uri", source.uri.clone())
                    .with_param("loop", looping)
                    .with_param("live", live || source.source_type != SourceType::File),
            )?;
            self.branch_mut(branch).set_outlet(Outlet::Forward(mux_tx.clone()));
        }

        // Display side first; its head is the analytics fan-out target.
        let (topology, display_head) = self.assemble_display(config, capacity, &mut hook_points)?;
        let head_tx = self.branch(display_head).sender();

        if AnalyticsChain::wanted(config) {
            let analytics = self.add_branch("analytics", BranchRole::Analytics, capacity);
            for stage in AnalyticsChain::from_config(config).into_flow_order(config) {
                self.add_stage(analytics, stage)?;
            }
            let (primary, tee) = {
                let branch = self.branch(analytics);
                (branch.position(StageKind::PrimaryInference), branch.position(StageKind::FanOut))
            };
            if let Some(index) = primary {
                hook_points
                    .entry(HookPoint::PostPrimaryInference)
                    .or_default()
                    .push((analytics, Port::output(index)));
            }
            if let Some(index) = tee {
                hook_points
                    .entry(HookPoint::PostSharedAnalytics)
                    .or_default()
                    .push((analytics, Port::input(index)));
            }

            let mut consumers = vec![head_tx];
            if let Some(export) = self.assemble_export(config, capacity, live)? {
                consumers.push(self.branch(export).sender());
            }
            self.branch_mut(analytics).set_outlet(Outlet::FanOut(consumers));
            let analytics_tx = self.branch(analytics).sender();
            self.branch_mut(mux).set_outlet(Outlet::Forward(analytics_tx));
        } else {
            if config.message_converter.as_ref().is_some_and(|c| c.enable) {
                tracing::warn!("message converter enabled without analytics; ignored");
            }
            self.branch_mut(mux).set_outlet(Outlet::Forward(head_tx));
        }

        Ok(Plan {
            topology,
            display_head,
            hook_points,
            mux: mux_settings,
        })
    }

    /// Build the output side; returns the layout and its head branch.
    fn assemble_display(
        &mut self,
        config: &GraphConfig,
        capacity: usize,
        hook_points: &mut BTreeMap<HookPoint, Vec<(BranchId, Port)>>,
    ) -> Result<(DisplayTopology, BranchId), BuildError> {
        let display_sinks: Vec<(usize, &SinkConfig)> = config
            .sinks
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enable && !s.is_export())
            .collect();
        let source_ids: BTreeSet<SourceId> = config.enabled_sources().map(|(id, _)| id).collect();

        match config.tiled_display.mode {
            TiledDisplayMode::Enabled => {
                let tiled = self.assemble_tiled(config, capacity, &display_sinks, hook_points)?;
                Ok((DisplayTopology::Tiled, tiled))
            }
            TiledDisplayMode::EnabledWithParallelSplit => {
                let mut split_bound = display_sinks.iter().filter(|(_, s)| s.link_to_split);
                let Some(&(index, target)) = split_bound.next() else {
                    return Err(BuildError::MissingSplitTarget);
                };
                for (ignored, _) in split_bound {
                    tracing::warn!("sink_{} also marked link_to_split; only sink_{} is used", ignored, index);
                }
                if !source_ids.contains(&target.source_id) {
                    return Err(BuildError::InvalidConfig(format!(
                        "sink_{} bound to unknown source {}",
                        index, target.source_id
                    )));
                }

                let tiled = self.assemble_tiled(config, capacity, &display_sinks, hook_points)?;
                let per_source =
                    self.assemble_per_source(config, capacity, target.source_id, &[(index, target)], hook_points)?;
                let splitter = self.add_branch("demux", BranchRole::Splitter, capacity);
                self.add_stage(splitter, StageConfig::new(StageKind::Splitter, "demux"))?;
                let route = BTreeMap::from([(target.source_id, self.branch(per_source).sender())]);
                self.branch_mut(splitter).set_outlet(Outlet::Split(route));

                let junction = self.add_branch("display_tee", BranchRole::DisplayJunction, capacity);
                self.add_stage(junction, StageConfig::new(StageKind::FanOut, "display_tee"))?;
                let consumers = vec![self.branch(tiled).sender(), self.branch(splitter).sender()];
                self.branch_mut(junction).set_outlet(Outlet::FanOut(consumers));

                Ok((
                    DisplayTopology::TiledWithSplit {
                        source_id: target.source_id,
                    },
                    junction,
                ))
            }
            TiledDisplayMode::Disabled => {
                let mut routes = BTreeMap::new();
                for source_id in &source_ids {
                    let sinks: Vec<_> = display_sinks
                        .iter()
                        .filter(|(_, s)| !s.link_to_split && s.source_id == *source_id)
                        .copied()
                        .collect();
                    if sinks.is_empty() {
                        tracing::debug!("no sink for source {}, no output branch", source_id);
                        continue;
                    }
                    let branch = self.assemble_per_source(config, capacity, *source_id, &sinks, hook_points)?;
                    routes.insert(*source_id, self.branch(branch).sender());
                }
                for (index, sink) in &display_sinks {
                    if !source_ids.contains(&sink.source_id) {
                        tracing::warn!("sink_{} refers to unknown source {}; skipped", index, sink.source_id);
                    }
                }
                let splitter = self.add_branch("demux", BranchRole::Splitter, capacity);
                self.add_stage(splitter, StageConfig::new(StageKind::Splitter, "demux"))?;
                let outlet = if routes.is_empty() {
                    tracing::warn!("no per-source outputs configured");
                    Outlet::Terminal
                } else {
                    Outlet::Split(routes)
                };
                self.branch_mut(splitter).set_outlet(outlet);
                Ok((DisplayTopology::Split, splitter))
            }
        }
    }

    fn assemble_tiled(
        &mut self,
        config: &GraphConfig,
        capacity: usize,
        display_sinks: &[(usize, &SinkConfig)],
        hook_points: &mut BTreeMap<HookPoint, Vec<(BranchId, Port)>>,
    ) -> Result<BranchId, BuildError> {
        let tiled_sinks: Vec<_> = display_sinks
            .iter()
            .filter(|(_, s)| !s.link_to_split)
            .copied()
            .collect();
        if tiled_sinks.is_empty() {
            return Err(BuildError::InvalidConfig(
                "tiled display enabled but no sink feeds it".into(),
            ));
        }

        let tiled_cfg = &config.tiled_display;
        let count = config.enabled_sources().count() as u32;
        let (rows, columns) = tiled_cfg.grid_for(count);
        if (rows, columns) != (tiled_cfg.rows, tiled_cfg.columns) {
            tracing::warn!(
                "tiler grid {}x{} too small for {} sources, using {}x{}",
                tiled_cfg.rows,
                tiled_cfg.columns,
                count,
                rows,
                columns
            );
        }

        let tiled = self.add_branch("tiled", BranchRole::Tiled, capacity);
        self.add_stage(
            tiled,
            StageConfig::new(StageKind::Tiler, "tiler")
                .with_params(tiled_cfg.params.clone())
                .with_param("rows", rows)
                .with_param("columns", columns)
                .with_param("width", tiled_cfg.width)
                .with_param("height", tiled_cfg.height),
        )?;
        self.add_outputs(tiled, config, &tiled_sinks, hook_points)?;
        Ok(tiled)
    }

    fn assemble_per_source(
        &mut self,
        config: &GraphConfig,
        capacity: usize,
        source_id: SourceId,
        sinks: &[(usize, &SinkConfig)],
        hook_points: &mut BTreeMap<HookPoint, Vec<(BranchId, Port)>>,
    ) -> Result<BranchId, BuildError> {
        let branch = self.add_branch(
            format!("src_{}_out", source_id),
            BranchRole::PerSource { source_id },
            capacity,
        );
        self.add_outputs(branch, config, sinks, hook_points)?;
        Ok(branch)
    }

    /// Renderer (when enabled) then sinks; registers the pre-sink hook port.
    fn add_outputs(
        &mut self,
        branch: BranchId,
        config: &GraphConfig,
        sinks: &[(usize, &SinkConfig)],
        hook_points: &mut BTreeMap<HookPoint, Vec<(BranchId, Port)>>,
    ) -> Result<(), BuildError> {
        let entry = self.branch(branch).len();
        if let Some(renderer) = config.renderer.as_ref().filter(|r| r.enable) {
            let stage = StageConfig::new(StageKind::Renderer, format!("osd_{}", branch.as_u32()))
                .with_params(renderer.params.clone())
                .with_param("border_width", renderer.border_width)
                .with_param("text_size", renderer.text_size)
                .with_param("font", renderer.font.clone());
            self.add_stage(branch, stage)?;
        }
        for (index, sink) in sinks {
            self.add_stage(branch, sink_stage(*index, sink, config.mux.live_source))?;
        }
        hook_points
            .entry(HookPoint::PreSink)
            .or_default()
            .push((branch, Port::input(entry)));
        Ok(())
    }

    /// First enabled message broker sink, if any.
    fn assemble_export(
        &mut self,
        config: &GraphConfig,
        capacity: usize,
        live: bool,
    ) -> Result<Option<BranchId>, BuildError> {
        let mut exports = config
            .sinks
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enable && s.is_export());
        let Some((index, sink)) = exports.next() else {
            return Ok(None);
        };
        for (ignored, _) in exports {
            tracing::warn!("only one message broker sink is supported; sink_{} ignored", ignored);
        }
        let branch = self.add_branch("export", BranchRole::Export, capacity);
        self.add_stage(branch, sink_stage(index, sink, live))?;
        Ok(Some(branch))
    }

    fn add_branch(&mut self, name: impl Into<String>, role: BranchRole, capacity: usize) -> BranchId {
        let id = BranchId::new(self.branches.len() as u32);
        let branch = Branch::new(id, name, role, capacity);
        tracing::debug!("[{}] branch {} ({})", branch.name(), id, role.as_str());
        self.branches.push(branch);
        id
    }

    fn branch(&self, id: BranchId) -> &Branch {
        &self.branches[id.as_u32() as usize]
    }

    fn branch_mut(&mut self, id: BranchId) -> &mut Branch {
        &mut self.branches[id.as_u32() as usize]
    }

    fn add_stage(&mut self, branch: BranchId, config: StageConfig) -> Result<(), BuildError> {
        if !self.factory.can_create(config.kind) {
            return Err(BuildError::StageCreateFailed {
                stage: config.name,
                reason: format!("no factory for {} stages", config.kind),
            });
        }
        let directory = self.context.directory().clone();
        let id = directory.allocate(&config.name, StageParent::Branch(branch));
        let ctx = StageContext::new(id, &config.name, self.context.events(), directory.clone());
        match self.factory.create(&config, &ctx) {
            Ok(stage) => {
                tracing::debug!("[{}] created {} ({})", self.branch(branch).name(), config.name, id);
                self.branch_mut(branch)
                    .link_into(StageInstance::new(id, config.kind, config.name, stage));
                Ok(())
            }
            Err(e) => {
                directory.remove(id);
                Err(BuildError::StageCreateFailed {
                    stage: config.name,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stop and drop every stage created so far, newest first.
    fn unwind(&mut self) {
        let directory = self.context.directory().clone();
        for branch in self.branches.iter_mut().rev() {
            let ids: Vec<_> = branch.stages().iter().rev().map(|s| s.id).collect();
            for id in ids {
                if let Some(mut instance) = branch.detach(id) {
                    if let Err(e) = instance.stage.set_state(StageState::Stopped) {
                        tracing::warn!("[{}] stopping {} during unwind: {}", branch.name(), instance.name, e);
                    }
                }
                directory.remove(id);
            }
        }
        self.branches.clear();
    }
}

fn sink_stage(index: usize, sink: &SinkConfig, live: bool) -> StageConfig {
    let mut stage = StageConfig::new(StageKind::Sink, format!("sink_{}", index))
        .with_target(sink.source_id)
        .with_params(sink.params.clone())
        .with_param("type", sink.sink_type.as_str())
        .with_param("sync", sink.sync);
    if let Some(qos) = sink.effective_qos(live) {
        stage = stage.with_param("qos", qos);
    }
    stage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{
        InferenceConfig, SinkType, SourceConfig, TiledDisplayConfig, TrackerConfig,
    };
    use crate::core::error::StageError;
    use crate::core::stages::{Stage, SyntheticStageFactory};
    use parking_lot::Mutex;

    fn sources(n: usize) -> Vec<SourceConfig> {
        (0..n)
            .map(|i| SourceConfig::new(SourceType::Synthetic, format!("synthetic://{}", i)))
            .collect()
    }

    fn builder() -> GraphBuilder {
        GraphBuilder::new(Arc::new(SyntheticStageFactory::new()))
    }

    #[test]
    fn test_tiled_single_output_branch() {
        for n in [1, 4, 9] {
            let config = GraphConfig {
                sources: sources(n),
                sinks: vec![SinkConfig::new(SinkType::Fake)],
                tiled_display: TiledDisplayConfig {
                    mode: TiledDisplayMode::Enabled,
                    ..Default::default()
                },
                ..Default::default()
            };
            let graph = builder().build(&config).unwrap();
            assert_eq!(graph.output_branches().count(), 1);
            assert_eq!(graph.topology(), DisplayTopology::Tiled);
            assert_eq!(
                graph
                    .branches_with_role(|r| matches!(r, BranchRole::Source { .. }))
                    .count(),
                n
            );
        }
    }

    #[test]
    fn test_tiler_grid_readjusted() {
        let config = GraphConfig {
            sources: sources(5),
            sinks: vec![SinkConfig::new(SinkType::Fake)],
            tiled_display: TiledDisplayConfig {
                mode: TiledDisplayMode::Enabled,
                rows: 1,
                columns: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let graph = builder().build(&config).unwrap();
        let tiled = graph.output_branches().next().unwrap();
        assert_eq!(tiled.stage_kinds(), vec![StageKind::Tiler, StageKind::Sink]);
    }

    #[test]
    fn test_capacity_and_empty_sources() {
        let mut config = GraphConfig {
            sources: sources(3),
            ..Default::default()
        };
        config.limits.max_sources = 2;
        assert_eq!(
            builder().build(&config).unwrap_err(),
            BuildError::CapacityExceeded {
                what: "sources",
                requested: 3,
                limit: 2
            }
        );

        let mut config = GraphConfig {
            sources: sources(1),
            ..Default::default()
        };
        config.sources[0].enable = false;
        assert_eq!(builder().build(&config).unwrap_err(), BuildError::NoSources);
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let mut config = GraphConfig {
            sources: sources(2),
            ..Default::default()
        };
        config.sources[0].id = Some(1);
        assert!(matches!(
            builder().build(&config),
            Err(BuildError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_source_id_beyond_limit_rejected() {
        let mut config = GraphConfig {
            sources: sources(2),
            ..Default::default()
        };
        config.sources[1].id = Some(5_000_000);
        let err = builder().build(&config).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(ref msg) if msg.contains("5000000")));

        config.sources[1].id = Some(config.limits.max_sources as SourceId - 1);
        assert!(builder().build(&config).is_ok());
    }

    #[test]
    fn test_parallel_split_requires_target() {
        let config = GraphConfig {
            sources: sources(2),
            sinks: vec![SinkConfig::new(SinkType::Fake)],
            tiled_display: TiledDisplayConfig {
                mode: TiledDisplayMode::EnabledWithParallelSplit,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(builder().build(&config).unwrap_err(), BuildError::MissingSplitTarget);
    }

    #[test]
    fn test_parallel_split_uses_first_marked_sink() {
        let config = GraphConfig {
            sources: sources(3),
            sinks: vec![
                SinkConfig::new(SinkType::Fake),
                SinkConfig::new(SinkType::File).for_source(2).linked_to_split(),
                SinkConfig::new(SinkType::File).for_source(1).linked_to_split(),
            ],
            tiled_display: TiledDisplayConfig {
                mode: TiledDisplayMode::EnabledWithParallelSplit,
                ..Default::default()
            },
            ..Default::default()
        };
        let graph = builder().build(&config).unwrap();
        assert_eq!(graph.topology(), DisplayTopology::TiledWithSplit { source_id: 2 });
        let per_source: Vec<_> = graph
            .branches_with_role(|r| matches!(r, BranchRole::PerSource { .. }))
            .map(|b| b.role().source_id())
            .collect();
        assert_eq!(per_source, vec![Some(2)]);
        assert_eq!(graph.output_branches().count(), 2);
    }

    #[test]
    fn test_analytics_and_hook_points() {
        let config = GraphConfig {
            sources: sources(1),
            sinks: vec![SinkConfig::new(SinkType::Fake)],
            primary_inference: Some(InferenceConfig::with_unique_id(1)),
            tracker: Some(TrackerConfig::default()),
            ..Default::default()
        };
        let graph = builder().build(&config).unwrap();
        let analytics = graph.analytics_branch().expect("analytics branch");
        assert_eq!(
            analytics.stage_kinds(),
            vec![StageKind::PrimaryInference, StageKind::Tracker, StageKind::FanOut]
        );
        assert_eq!(
            graph.hook_ports(HookPoint::PostPrimaryInference),
            &[(analytics.id(), Port::output(0))]
        );
        assert_eq!(
            graph.hook_ports(HookPoint::PostSharedAnalytics),
            &[(analytics.id(), Port::input(2))]
        );
        assert_eq!(graph.hook_ports(HookPoint::PreSink).len(), 1);
    }

    #[test]
    fn test_export_without_analytics_fails() {
        let config = GraphConfig {
            sources: sources(1),
            sinks: vec![SinkConfig::new(SinkType::MessageBroker)],
            ..Default::default()
        };
        assert!(matches!(
            builder().build(&config),
            Err(BuildError::ExportWithoutAnalytics { .. })
        ));
    }

    #[test]
    fn test_sink_qos_defaults_passed_to_stage() {
        let mut sink = SinkConfig::new(SinkType::Render);
        sink.sync = true;
        assert_eq!(sink_stage(0, &sink, false).param_bool("qos"), Some(true));
        sink.sync = false;
        assert_eq!(sink_stage(0, &sink, false).param_bool("qos"), Some(false));
        assert_eq!(sink_stage(0, &sink, true).param_bool("qos"), Some(true));
        let file = SinkConfig::new(SinkType::File);
        assert_eq!(sink_stage(0, &file, true).param_bool("qos"), None);
    }

    struct Tracked(Arc<Mutex<Vec<String>>>, String);
    impl Stage for Tracked {
        fn set_state(&mut self, state: StageState) -> Result<(), StageError> {
            self.0.lock().push(format!("{}:{:?}", self.1, state));
            Ok(())
        }
    }

    struct FailsOn {
        kind: StageKind,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl StageFactory for FailsOn {
        fn create(&self, config: &StageConfig, _ctx: &StageContext) -> Result<Box<dyn Stage>, StageError> {
            if config.kind == self.kind {
                return Err(StageError::internal("model file missing"));
            }
            Ok(Box::new(Tracked(self.log.clone(), config.name.clone())))
        }
    }

    #[test]
    fn test_failed_build_unwinds_created_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(FailsOn {
            kind: StageKind::PrimaryInference,
            log: log.clone(),
        });
        let config = GraphConfig {
            sources: sources(2),
            sinks: vec![SinkConfig::new(SinkType::Fake).for_source(0)],
            primary_inference: Some(InferenceConfig::with_unique_id(1)),
            ..Default::default()
        };
        let err = GraphBuilder::new(factory).build(&config).unwrap_err();
        assert!(matches!(err, BuildError::StageCreateFailed { ref stage, .. } if stage == "primary_gie"));

        let log = log.lock();
        assert!(log.contains(&"mux:Stopped".to_string()));
        assert!(log.contains(&"source_bin_0:Stopped".to_string()));
        assert!(log.contains(&"source_bin_1:Stopped".to_string()));
        assert!(log.contains(&"sink_0:Stopped".to_string()));
    }

    #[test]
    fn test_unsupported_kind_fails_build() {
        struct NoTiler;
        impl StageFactory for NoTiler {
            fn create(&self, _config: &StageConfig, _ctx: &StageContext) -> Result<Box<dyn Stage>, StageError> {
                Ok(Box::new(Tracked(Arc::default(), String::new())))
            }
            fn can_create(&self, kind: StageKind) -> bool {
                kind != StageKind::Tiler
            }
        }
        let config = GraphConfig {
            sources: sources(1),
            sinks: vec![SinkConfig::new(SinkType::Fake)],
            tiled_display: TiledDisplayConfig {
                mode: TiledDisplayMode::Enabled,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = GraphBuilder::new(Arc::new(NoTiler)).build(&config);
        assert!(matches!(result, Err(BuildError::StageCreateFailed { ref stage, .. }) if stage == "tiler"));
    }
}
