// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Application callbacks wired to the built-in hook points.

use std::sync::Arc;

use crate::core::hooks::HookInfo;
use crate::core::metadata::{BatchMeta, DataUnit};
use crate::core::observability::PerfStats;

/// Read-only view of a unit after shared analytics; `usize` is the output index.
pub type AnalyticsCallback = Arc<dyn Fn(&DataUnit, usize) + Send + Sync>;

/// Write access to a unit's metadata on one output branch. Skipped when the
/// unit is still shared with another consumer.
pub type OutputCallback = Arc<dyn Fn(&mut BatchMeta, &HookInfo) + Send + Sync>;

pub type PerfCallback = Arc<dyn Fn(&PerfStats) + Send + Sync>;

#[derive(Clone, Default)]
pub struct GraphCallbacks {
    pub on_shared_analytics_done: Option<AnalyticsCallback>,
    pub on_per_output_ready: Option<OutputCallback>,
    pub on_overlay: Option<OutputCallback>,
    pub on_performance_sample: Option<PerfCallback>,
}

impl GraphCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shared_analytics_done<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataUnit, usize) + Send + Sync + 'static,
    {
        self.on_shared_analytics_done = Some(Arc::new(f));
        self
    }

    pub fn with_per_output_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut BatchMeta, &HookInfo) + Send + Sync + 'static,
    {
        self.on_per_output_ready = Some(Arc::new(f));
        self
    }

    pub fn with_overlay<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut BatchMeta, &HookInfo) + Send + Sync + 'static,
    {
        self.on_overlay = Some(Arc::new(f));
        self
    }

    pub fn with_performance_sample<F>(mut self, f: F) -> Self
    where
        F: Fn(&PerfStats) + Send + Sync + 'static,
    {
        self.on_performance_sample = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for GraphCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCallbacks")
            .field("on_shared_analytics_done", &self.on_shared_analytics_done.is_some())
            .field("on_per_output_ready", &self.on_per_output_ready.is_some())
            .field("on_overlay", &self.on_overlay.is_some())
            .field("on_performance_sample", &self.on_performance_sample.is_some())
            .finish()
    }
}
