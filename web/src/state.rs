//! Application state for the HTTP server.

use softlock_core::{Backend, Engine};
use std::sync::Arc;

/// State shared across all handlers.
///
/// Cloned per request; the engine sits behind an `Arc`.
pub struct AppState<B: Backend> {
    /// The reservation engine
    pub engine: Arc<Engine<B>>,
}

impl<B: Backend> AppState<B> {
    /// Create a new application state.
    #[must_use]
    pub fn new(engine: Engine<B>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

// Manual impl: `B` itself need not be `Clone`
impl<B: Backend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}
