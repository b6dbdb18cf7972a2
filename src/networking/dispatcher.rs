// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Control message dispatch (§4.8).
//!
//! Handlers are registered eagerly at startup, keyed by envelope `type`. An
//! unrecognized type is a `PolicyError::UnknownType`, not a panic. Dispatch
//! is best-effort async: a handler failure is logged and counted but never
//! propagated back to the transport layer, since a single bad handler must
//! not be able to take down the listener loop. Handlers are expected to be
//! idempotent — the replay cache prevents exact-duplicate delivery, but a
//! handler may still observe the same logical request more than once across
//! a reconnect, and must tolerate that.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    core::types::{ControlEnvelope, PeerContext},
    error::HandlerError,
};

/// A control message handler for one envelope type.
#[async_trait]
pub trait ControlHandler: Send + Sync {
    /// Handle a validated envelope of this handler's registered type.
    async fn handle(&self, envelope: &ControlEnvelope, ctx: &PeerContext) -> Result<(), HandlerError>;
}

/// Registry mapping envelope type strings to handlers.
#[derive(Default)]
pub struct ControlDispatcher {
    handlers: HashMap<String, Arc<dyn ControlHandler>>,
}

impl ControlDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Register `handler` for `envelope_type`. Registering the same type
    /// twice replaces the previous handler.
    pub fn register(&mut self, envelope_type: impl Into<String>, handler: Arc<dyn ControlHandler>) {
        self.handlers.insert(envelope_type.into(), handler);
    }

    /// Dispatch a validated envelope. Returns `Ok(())` even if the handler
    /// fails internally; the caller should inspect tracing/metrics output
    /// for handler-level failures rather than branch on this result.
    pub async fn dispatch(&self, envelope: &ControlEnvelope, ctx: &PeerContext) -> Result<(), crate::error::PolicyError> {
        let handler = self
            .handlers
            .get(&envelope.r#type)
            .ok_or(crate::error::PolicyError::UnknownType)?
            .clone();

        if let Err(err) = handler.handle(envelope, ctx).await {
            tracing::warn!(envelope_type = %envelope.r#type, peer = %ctx.peer_id, error = %err, "handler failed");
        }
        Ok(())
    }

    /// Whether a handler is registered for `envelope_type`.
    pub fn has_handler(&self, envelope_type: &str) -> bool {
        self.handlers.contains_key(envelope_type)
    }
}
