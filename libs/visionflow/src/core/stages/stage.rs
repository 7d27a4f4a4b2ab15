// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use crate::core::config::StageParams;
use crate::core::error::StageError;
use crate::core::metadata::{DataUnit, FrameMeta, SourceId};

/// Closed set of stage kinds a graph can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Source,
    Mux,
    PrimaryInference,
    SecondaryInference,
    Tracker,
    MessageConverter,
    Tiler,
    Renderer,
    Sink,
    Splitter,
    FanOut,
    Converter,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Mux => "mux",
            StageKind::PrimaryInference => "primary_inference",
            StageKind::SecondaryInference => "secondary_inference",
            StageKind::Tracker => "tracker",
            StageKind::MessageConverter => "message_converter",
            StageKind::Tiler => "tiler",
            StageKind::Renderer => "renderer",
            StageKind::Sink => "sink",
            StageKind::Splitter => "splitter",
            StageKind::FanOut => "fan_out",
            StageKind::Converter => "converter",
        }
    }

    /// Junction stages route units between branches instead of transforming them.
    pub fn is_junction(&self) -> bool {
        matches!(self, StageKind::Splitter | StageKind::FanOut)
    }

    pub fn is_analytics(&self) -> bool {
        matches!(
            self,
            StageKind::PrimaryInference | StageKind::SecondaryInference | StageKind::Tracker
        )
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative description of one stage, handed to the [`StageFactory`].
///
/// [`StageFactory`]: crate::core::stages::StageFactory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub kind: StageKind,
    /// Instance name, unique within a graph (e.g. `source_bin_0`).
    pub name: String,
    /// Source id for sources and per-source stages; sink index for sinks.
    pub target_id: Option<SourceId>,
    pub enable: bool,
    pub params: StageParams,
}

impl StageConfig {
    pub fn new(kind: StageKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            target_id: None,
            enable: true,
            params: StageParams::new(),
        }
    }

    pub fn with_target(mut self, target_id: SourceId) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn with_params(mut self, params: StageParams) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(|v| v.as_f64())
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| v.as_bool())
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// State requested of a stage by its branch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Paused,
    Running,
    Stopped,
}

/// Result of polling a source stage for its next frame.
#[derive(Debug)]
pub enum SourcePoll {
    Frame(FrameMeta),
    /// Nothing available yet; poll again shortly.
    Pending,
    EndOfStream,
}

/// One processing stage.
///
/// Stages run on their branch's worker thread. Sources are polled through
/// [`poll_frame`](Stage::poll_frame); every other kind receives batches
/// through [`process`](Stage::process).
pub trait Stage: Send {
    fn process(&mut self, _unit: &mut DataUnit) -> Result<(), StageError> {
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<SourcePoll, StageError> {
        Ok(SourcePoll::EndOfStream)
    }

    fn set_state(&mut self, _state: StageState) -> Result<(), StageError> {
        Ok(())
    }

    /// Return to a freshly started condition (reconnect, rewind).
    fn reset(&mut self) -> Result<(), StageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_config_params() {
        let cfg = StageConfig::new(StageKind::Source, "source_bin_0")
            .with_target(0)
            .with_param("fps", 25)
            .with_param("uri", "file:///tmp/a.mp4")
            .with_param("loop", true);
        assert_eq!(cfg.param_u64("fps"), Some(25));
        assert_eq!(cfg.param_str("uri"), Some("file:///tmp/a.mp4"));
        assert_eq!(cfg.param_bool("loop"), Some(true));
        assert_eq!(cfg.param_u64("missing"), None);
        assert_eq!(cfg.target_id, Some(0));
    }

    #[test]
    fn test_stage_kind_classes() {
        assert!(StageKind::FanOut.is_junction());
        assert!(StageKind::Splitter.is_junction());
        assert!(!StageKind::Tiler.is_junction());
        assert!(StageKind::Tracker.is_analytics());
        assert!(!StageKind::MessageConverter.is_analytics());
    }

    #[test]
    fn test_default_stage_behavior() {
        struct Noop;
        impl Stage for Noop {}
        let mut stage = Noop;
        assert!(matches!(stage.poll_frame(), Ok(SourcePoll::EndOfStream)));
        assert!(stage.reset().is_ok());
        assert!(stage.set_state(StageState::Running).is_ok());
    }
}
