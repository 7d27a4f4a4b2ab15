// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use visionflow::core::{
    GraphConfig, SinkConfig, SinkType, SourceConfig, SourceType, Stage, StageConfig,
    StageContext, StageError, StageFactory, StageParams, SyntheticStageFactory,
    TiledDisplayMode,
};

/// Route library logs through the test harness; `RUST_LOG` selects the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

type StageMaker = Box<dyn Fn(&StageConfig, &StageContext) -> Box<dyn Stage> + Send + Sync>;

/// Synthetic stages, except for stage names given a custom constructor.
pub struct OverrideFactory {
    base: SyntheticStageFactory,
    overrides: Vec<(String, StageMaker)>,
}

impl OverrideFactory {
    pub fn new() -> Self {
        init_logging();
        Self {
            base: SyntheticStageFactory::new(),
            overrides: Vec::new(),
        }
    }

    pub fn with<F>(mut self, name: &str, make: F) -> Self
    where
        F: Fn(&StageConfig, &StageContext) -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.overrides.push((name.to_string(), Box::new(make)));
        self
    }

    pub fn shared(self) -> Arc<dyn StageFactory> {
        Arc::new(self)
    }
}

impl StageFactory for OverrideFactory {
    fn create(
        &self,
        config: &StageConfig,
        ctx: &StageContext,
    ) -> Result<Box<dyn Stage>, StageError> {
        match self.overrides.iter().find(|(name, _)| *name == config.name) {
            Some((_, make)) => Ok(make(config, ctx)),
            None => self.base.create(config, ctx),
        }
    }
}

pub fn synthetic() -> Arc<dyn StageFactory> {
    init_logging();
    Arc::new(SyntheticStageFactory::new())
}

/// A paced synthetic source; `num_frames` of `None` runs until stopped.
pub fn source(source_type: SourceType, fps: u64, num_frames: Option<u64>) -> SourceConfig {
    let mut params = StageParams::new();
    params.insert("fps".into(), fps.into());
    if let Some(n) = num_frames {
        params.insert("num_frames".into(), n.into());
    }
    SourceConfig {
        params,
        ..SourceConfig::new(source_type, "pattern://smpte")
    }
}

/// `count` file sources composited onto one fake sink.
pub fn tiled_config(count: usize, fps: u64, num_frames: Option<u64>) -> GraphConfig {
    let mut cfg = GraphConfig {
        sources: (0..count)
            .map(|_| source(SourceType::File, fps, num_frames))
            .collect(),
        sinks: vec![SinkConfig::new(SinkType::Fake)],
        ..Default::default()
    };
    cfg.tiled_display.mode = TiledDisplayMode::Enabled;
    cfg
}
