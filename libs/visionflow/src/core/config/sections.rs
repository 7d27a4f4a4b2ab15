// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-stage configuration sections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::metadata::{Color, SourceId};

/// Opaque key/value parameters forwarded to the stage factory.
pub type StageParams = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    #[default]
    Uri,
    /// Network stream; errors on it are recovered by resetting the branch.
    Rtsp,
    /// Local capture device.
    Camera,
    Synthetic,
}

impl SourceType {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SourceType::Rtsp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::File => "file",
            SourceType::Uri => "uri",
            SourceType::Rtsp => "rtsp",
            SourceType::Camera => "camera",
            SourceType::Synthetic => "synthetic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Defaults to the position in the source list.
    pub id: Option<SourceId>,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub uri: String,
    pub enable: bool,
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    pub params: StageParams,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            id: None,
            source_type: SourceType::default(),
            uri: String::new(),
            enable: true,
            loop_playback: false,
            params: StageParams::new(),
        }
    }
}

impl SourceConfig {
    pub fn new(source_type: SourceType, uri: impl Into<String>) -> Self {
        Self {
            source_type,
            uri: uri.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    #[default]
    Fake,
    Render,
    File,
    Network,
    /// Publishes converted analytics messages; attaches to the fan-out junction.
    MessageBroker,
}

impl SinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkType::Fake => "fake",
            SinkType::Render => "render",
            SinkType::File => "file",
            SinkType::Network => "network",
            SinkType::MessageBroker => "message_broker",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    #[serde(rename = "type")]
    pub sink_type: SinkType,
    pub enable: bool,
    /// Input this sink renders in split mode.
    pub source_id: SourceId,
    /// Bind this sink to the per-source output of a parallel split.
    pub link_to_split: bool,
    pub sync: bool,
    /// Explicit QoS; when unset, see [`SinkConfig::effective_qos`].
    pub qos: Option<bool>,
    pub params: StageParams,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            sink_type: SinkType::default(),
            enable: true,
            source_id: 0,
            link_to_split: false,
            sync: false,
            qos: None,
            params: StageParams::new(),
        }
    }
}

impl SinkConfig {
    pub fn new(sink_type: SinkType) -> Self {
        Self {
            sink_type,
            ..Default::default()
        }
    }

    pub fn for_source(mut self, source_id: SourceId) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn linked_to_split(mut self) -> Self {
        self.link_to_split = true;
        self
    }

    pub fn is_export(&self) -> bool {
        self.sink_type == SinkType::MessageBroker
    }

    /// Render and fake sinks without an explicit setting enable QoS when
    /// the mux is live or the sink synchronizes to the clock.
    pub fn effective_qos(&self, live_source: bool) -> Option<bool> {
        match (self.qos, self.sink_type) {
            (Some(qos), _) => Some(qos),
            (None, SinkType::Render | SinkType::Fake) => Some(live_source || self.sync),
            (None, _) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Frames per batch; 0 means one per enabled source.
    pub batch_size: usize,
    /// Push a partial batch after this long.
    pub batch_timeout_ms: u64,
    pub live_source: bool,
    pub width: u32,
    pub height: u32,
    pub params: StageParams,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            batch_size: 0,
            batch_timeout_ms: 40,
            live_source: false,
            width: 1920,
            height: 1080,
            params: StageParams::new(),
        }
    }
}

/// Color override for one detector class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassColor {
    pub class_id: i32,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub enable: bool,
    /// Component id stamped on the objects and labels this stage produces.
    pub unique_id: u32,
    pub border_color: Option<Color>,
    pub class_border_colors: Vec<ClassColor>,
    pub class_background_colors: Vec<ClassColor>,
    pub params: StageParams,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enable: true,
            unique_id: 1,
            border_color: None,
            class_border_colors: Vec::new(),
            class_background_colors: Vec::new(),
            params: StageParams::new(),
        }
    }
}

impl InferenceConfig {
    pub fn with_unique_id(unique_id: u32) -> Self {
        Self {
            unique_id,
            ..Default::default()
        }
    }

    pub fn border_for_class(&self, class_id: i32) -> Option<Color> {
        self.class_border_colors
            .iter()
            .find(|c| c.class_id == class_id)
            .map(|c| c.color)
            .or(self.border_color)
    }

    pub fn background_for_class(&self, class_id: i32) -> Option<Color> {
        self.class_background_colors
            .iter()
            .find(|c| c.class_id == class_id)
            .map(|c| c.color)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub enable: bool,
    pub params: StageParams,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            params: StageParams::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConverterConfig {
    pub enable: bool,
    pub params: StageParams,
}

impl Default for MessageConverterConfig {
    fn default() -> Self {
        Self {
            enable: true,
            params: StageParams::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiledDisplayMode {
    /// Per-source outputs only.
    #[default]
    Disabled,
    Enabled,
    /// Tiled output plus one per-source output for a split-bound sink.
    EnabledWithParallelSplit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TiledDisplayConfig {
    pub mode: TiledDisplayMode,
    pub rows: u32,
    pub columns: u32,
    pub width: u32,
    pub height: u32,
    pub params: StageParams,
}

impl Default for TiledDisplayConfig {
    fn default() -> Self {
        Self {
            mode: TiledDisplayMode::Disabled,
            rows: 1,
            columns: 1,
            width: 1280,
            height: 720,
            params: StageParams::new(),
        }
    }
}

impl TiledDisplayConfig {
    /// Grid large enough for `sources` tiles.
    ///
    /// When the configured grid is too small, columns default to the rounded
    /// square root of the source count and rows grow to fit.
    pub fn grid_for(&self, sources: u32) -> (u32, u32) {
        if self.rows.saturating_mul(self.columns) >= sources {
            return (self.rows, self.columns);
        }
        let columns = if self.columns == 0 {
            ((sources as f64).sqrt() + 0.5) as u32
        } else {
            self.columns
        }
        .max(1);
        let rows = sources.div_ceil(columns);
        (rows, columns)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub enable: bool,
    pub border_width: u32,
    pub text_size: u32,
    pub text_color: Color,
    pub text_background: Option<Color>,
    pub font: String,
    pub params: StageParams,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable: true,
            border_width: 2,
            text_size: 15,
            text_color: Color::WHITE,
            text_background: Some(Color::BLACK),
            font: "Serif".to_string(),
            params: StageParams::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub enable: bool,
    pub interval_sec: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enable: false,
            interval_sec: 5,
        }
    }
}

/// Capacity limits checked before any stage is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphLimits {
    pub max_sources: usize,
    pub max_sinks: usize,
    pub max_secondary_inference: usize,
    /// Units buffered between two branches before the upstream one blocks.
    pub queue_capacity: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_sources: 1024,
            max_sinks: 1024,
            max_secondary_inference: 16,
            queue_capacity: 8,
        }
    }
}

/// Directories for KITTI-format dumps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KittiOutputConfig {
    pub detection_dir: Option<PathBuf>,
    pub tracking_dir: Option<PathBuf>,
}
