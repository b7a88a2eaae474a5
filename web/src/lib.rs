//! HTTP surface for the Softlock reservation engine.
//!
//! Handlers are thin: they extract the request, apply the per-client rate
//! limit where the route has one, call the engine, and map
//! [`softlock_core::AllocError`] to a status code through [`AppError`].
//!
//! # Example
//!
//! ```
//! use softlock_web::{AppState, build_router};
//! use softlock_testing::TestHarness;
//!
//! # tokio_test::block_on(async {
//! let harness = TestHarness::builder().counted("gold", 500_000, 10).build().await;
//! let app = build_router(AppState::new(harness.engine));
//! # let _ = app;
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::ClientIp;
pub use routes::build_router;
pub use state::AppState;

