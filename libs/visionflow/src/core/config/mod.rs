// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Declarative graph configuration.
//!
//! Every struct derives serde with `#[serde(default)]`; callers parse it from
//! whatever file format they like and hand the result to the graph builder.

mod sections;

pub use sections::*;

use serde::{Deserialize, Serialize};

use crate::core::metadata::SourceId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub sources: Vec<SourceConfig>,
    pub sinks: Vec<SinkConfig>,
    pub mux: MuxConfig,
    pub primary_inference: Option<InferenceConfig>,
    pub secondary_inference: Vec<InferenceConfig>,
    pub tracker: Option<TrackerConfig>,
    pub message_converter: Option<MessageConverterConfig>,
    pub tiled_display: TiledDisplayConfig,
    pub renderer: Option<RendererConfig>,
    /// Loop every source at end of stream.
    pub file_loop: bool,
    pub performance: PerformanceConfig,
    pub latency_measurement: bool,
    pub kitti: KittiOutputConfig,
    /// Always compose display text, even on a multi-source tiled output.
    pub show_bbox_text: bool,
    pub limits: GraphLimits,
}

impl GraphConfig {
    /// Enabled sources paired with their resolved ids.
    pub fn enabled_sources(&self) -> impl Iterator<Item = (SourceId, &SourceConfig)> {
        self.sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.enable)
            .map(|(index, s)| (s.id.unwrap_or(index as SourceId), s))
    }

    pub fn primary_enabled(&self) -> bool {
        self.primary_inference.as_ref().is_some_and(|p| p.enable)
    }

    pub fn tracker_enabled(&self) -> bool {
        self.tracker.as_ref().is_some_and(|t| t.enable)
    }

    pub fn renderer_enabled(&self) -> bool {
        self.renderer.as_ref().is_some_and(|r| r.enable)
    }

    /// Enabled secondary stages; these only run behind a primary stage.
    pub fn active_secondaries(&self) -> impl Iterator<Item = &InferenceConfig> {
        let primary = self.primary_enabled();
        self.secondary_inference
            .iter()
            .filter(move |s| primary && s.enable)
    }

    /// Inference configuration whose `unique_id` matches `component_id`.
    pub fn inference_by_component(&self, component_id: u32) -> Option<&InferenceConfig> {
        self.primary_inference
            .iter()
            .chain(self.secondary_inference.iter())
            .find(|c| c.enable && c.unique_id == component_id)
    }

    /// Mux batch size, defaulting to one slot per enabled source.
    pub fn effective_batch_size(&self) -> usize {
        if self.mux.batch_size > 0 {
            self.mux.batch_size
        } else {
            self.enabled_sources().count().max(1)
        }
    }
}
