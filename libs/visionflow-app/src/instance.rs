// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One graph per configuration file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use visionflow::core::{
    GraphBuilder, GraphCallbacks, GraphConfig, LifecycleController, LifecycleError, LifecycleState,
    ShutdownSignal, StageFactory,
};

use crate::perf::PerfTable;

/// Extra time given to branches that missed the controller's start deadline.
const START_GRACE: Duration = Duration::from_secs(10);

pub struct Instance {
    index: usize,
    source: PathBuf,
    controller: LifecycleController,
    stopped: bool,
}

impl Instance {
    pub fn build(
        index: usize,
        source: PathBuf,
        config: &GraphConfig,
        factory: Arc<dyn StageFactory>,
        perf: Arc<PerfTable>,
    ) -> Result<Self> {
        let callbacks = GraphCallbacks::new().with_performance_sample(move |stats| perf.record(stats));
        let graph = GraphBuilder::new(factory)
            .with_callbacks(callbacks)
            .with_instance_index(index)
            .build(config)
            .with_context(|| format!("Failed to build graph for {}", source.display()))?;
        tracing::info!(
            "[instance-{}] {} branches from {}",
            index,
            graph.branches().len(),
            source.display()
        );
        Ok(Self {
            index,
            source,
            controller: LifecycleController::new(graph),
            stopped: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.controller.shutdown_signal().clone()
    }

    pub fn start(&mut self) -> Result<()> {
        match self.controller.start() {
            Ok(()) => {}
            Err(LifecycleError::StartTimeout { .. }) => {
                tracing::warn!("[instance-{}] slow to pause, waiting up to {:?}", self.index, START_GRACE);
                if !self.controller.wait_for_state(LifecycleState::Paused, START_GRACE) {
                    bail!(
                        "Instance {} ({}) did not pause within {:?}",
                        self.index,
                        self.source.display(),
                        START_GRACE
                    );
                }
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to start instance {} ({})", self.index, self.source.display())
                });
            }
        }
        self.controller
            .run()
            .with_context(|| format!("Failed to run instance {}", self.index))?;
        Ok(())
    }

    pub fn quit_requested(&self) -> bool {
        self.controller.shutdown_signal().quit_requested()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Tear the graph down once. Later calls do nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(e) = self.controller.stop() {
            tracing::warn!("[instance-{}] stop: {}", self.index, e);
        }
    }

    pub fn exit_status(&self) -> i32 {
        self.controller.exit_status()
    }
}
