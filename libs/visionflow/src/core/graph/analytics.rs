// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stage list for the shared analytics branch.
//!
//! The chain is assembled tail first: each stage is pushed in front of the
//! stages already present, the way links are made from the junction back
//! toward the mux. [`AnalyticsChain::into_flow_order`] performs the single
//! reversal into data-flow order, then appends message conversion and the
//! fan-out junction, which always close the branch.

use crate::core::config::GraphConfig;
use crate::core::stages::{StageConfig, StageKind};

#[derive(Debug, Default)]
pub(crate) struct AnalyticsChain {
    tail_first: Vec<StageConfig>,
}

impl AnalyticsChain {
    /// Whether `config` needs an analytics branch at all.
    pub(crate) fn wanted(config: &GraphConfig) -> bool {
        config.primary_enabled() || config.tracker_enabled()
    }

    pub(crate) fn from_config(config: &GraphConfig) -> Self {
        let mut chain = Self::default();

        // Secondaries run in config order, so the last one is nearest the tail.
        let secondaries: Vec<_> = config.active_secondaries().collect();
        for (index, sgie) in secondaries.iter().enumerate().rev() {
            chain.push(
                StageConfig::new(StageKind::SecondaryInference, format!("secondary_gie_{}", index))
                    .with_params(sgie.params.clone())
                    .with_param("unique_id", sgie.unique_id),
            );
        }

        if let Some(tracker) = config.tracker.as_ref().filter(|t| t.enable) {
            chain.push(StageConfig::new(StageKind::Tracker, "tracker").with_params(tracker.params.clone()));
        }

        if let Some(pgie) = config.primary_inference.as_ref().filter(|p| p.enable) {
            chain.push(
                StageConfig::new(StageKind::PrimaryInference, "primary_gie")
                    .with_params(pgie.params.clone())
                    .with_param("unique_id", pgie.unique_id)
                    .with_param("batch_size", config.effective_batch_size() as u64),
            );
        }

        chain
    }

    /// Add a stage upstream of everything pushed so far.
    pub(crate) fn push(&mut self, stage: StageConfig) {
        self.tail_first.push(stage);
    }

    /// Stages in data-flow order, closed by message conversion (when
    /// enabled) and the fan-out junction.
    pub(crate) fn into_flow_order(self, config: &GraphConfig) -> Vec<StageConfig> {
        let mut stages = self.tail_first;
        stages.reverse();

        if let Some(conv) = config.message_converter.as_ref().filter(|c| c.enable) {
            stages.push(
                StageConfig::new(StageKind::MessageConverter, "msg_conv").with_params(conv.params.clone()),
            );
        }
        stages.push(StageConfig::new(StageKind::FanOut, "tee"));
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{InferenceConfig, MessageConverterConfig, TrackerConfig};

    fn kinds(stages: &[StageConfig]) -> Vec<StageKind> {
        stages.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn test_flow_order_after_reversal() {
        let config = GraphConfig {
            primary_inference: Some(InferenceConfig::with_unique_id(1)),
            secondary_inference: vec![
                InferenceConfig::with_unique_id(2),
                InferenceConfig::with_unique_id(3),
            ],
            tracker: Some(TrackerConfig::default()),
            message_converter: Some(MessageConverterConfig::default()),
            ..Default::default()
        };
        let stages = AnalyticsChain::from_config(&config).into_flow_order(&config);
        assert_eq!(
            kinds(&stages),
            vec![
                StageKind::PrimaryInference,
                StageKind::Tracker,
                StageKind::SecondaryInference,
                StageKind::SecondaryInference,
                StageKind::MessageConverter,
                StageKind::FanOut,
            ]
        );
        assert_eq!(stages[2].param_u64("unique_id"), Some(2));
        assert_eq!(stages[3].param_u64("unique_id"), Some(3));
        assert_eq!(stages[0].param_u64("unique_id"), Some(1));
    }

    #[test]
    fn test_secondaries_need_primary() {
        let config = GraphConfig {
            secondary_inference: vec![InferenceConfig::with_unique_id(2)],
            tracker: Some(TrackerConfig::default()),
            ..Default::default()
        };
        assert!(AnalyticsChain::wanted(&config));
        let stages = AnalyticsChain::from_config(&config).into_flow_order(&config);
        assert_eq!(kinds(&stages), vec![StageKind::Tracker, StageKind::FanOut]);
    }

    #[test]
    fn test_no_analytics_wanted_without_primary_or_tracker() {
        let config = GraphConfig {
            message_converter: Some(MessageConverterConfig::default()),
            ..Default::default()
        };
        assert!(!AnalyticsChain::wanted(&config));
    }
}
