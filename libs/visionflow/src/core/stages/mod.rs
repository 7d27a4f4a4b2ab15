// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod factory;
mod stage;
mod synthetic;

pub use factory::{StageContext, StageFactory};
pub use stage::{SourcePoll, Stage, StageConfig, StageKind, StageState};
pub use synthetic::SyntheticStageFactory;
