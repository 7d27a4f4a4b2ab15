// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stage creation capability.

use std::sync::Arc;

use crate::core::context::{StageDirectory, StageId, StageParent};
use crate::core::error::{StageError, StageErrorCode};
use crate::core::events::{EventOrigin, EventSender, GraphEvent};

use super::stage::{Stage, StageConfig, StageKind};

/// Creates stage instances for a graph.
///
/// The builder checks [`can_create`](StageFactory::can_create) before
/// calling [`create`](StageFactory::create) for each configured stage.
pub trait StageFactory: Send + Sync {
    fn create(
        &self,
        config: &StageConfig,
        ctx: &StageContext,
    ) -> Result<Box<dyn Stage>, StageError>;

    fn can_create(&self, _kind: StageKind) -> bool {
        true
    }
}

/// Handle given to a stage at creation.
///
/// Stages keep a clone to report faults asynchronously (for example from a
/// network receive thread) and to register internal children whose errors
/// must resolve back to the stage.
#[derive(Clone)]
pub struct StageContext {
    id: StageId,
    name: String,
    events: EventSender,
    directory: Arc<StageDirectory>,
}

impl StageContext {
    pub(crate) fn new(
        id: StageId,
        name: impl Into<String>,
        events: EventSender,
        directory: Arc<StageDirectory>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            events,
            directory,
        }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register an internal element owned by this stage.
    pub fn register_child(&self, name: impl Into<String>) -> StageId {
        self.directory.allocate(name, StageParent::Stage(self.id))
    }

    /// Report an error raised by this stage or one of its children.
    pub fn post_error(&self, source: StageId, code: StageErrorCode, detail: impl Into<String>) {
        let _ = self.events.send(GraphEvent::Error {
            source,
            code,
            detail: detail.into(),
        });
    }

    pub fn post_info(&self, detail: impl Into<String>) {
        let _ = self.events.send(GraphEvent::Info {
            origin: EventOrigin::Stage(self.id),
            detail: detail.into(),
        });
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
