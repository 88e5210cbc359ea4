//! Command handlers and their registry.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use protocol::{CommandKind, Envelope};

use crate::error::Result;

/// A capability the job worker can execute.
///
/// Handlers are registered once, before the worker starts, under the
/// [`CommandKind`] they serve.
pub trait CommandHandler: Send + Sync {
    /// The command kind this handler serves.
    fn kind(&self) -> CommandKind;

    /// Execute one command. On success, returns the artifact the command
    /// produced, if any.
    fn handle<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PathBuf>>> + Send + 'a>>;
}

/// Lookup table from command kind to handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its kind, replacing any previous one.
    pub fn register(&mut self, handler: impl CommandHandler + 'static) -> &mut Self {
        let kind = handler.kind();
        if self.handlers.insert(kind, Arc::new(handler)).is_some() {
            tracing::warn!(%kind, "Replacing command handler");
        }
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Handler for `kind`.
    pub fn get(&self, kind: CommandKind) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<CommandKind> {
        self.handlers.keys().copied().collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
