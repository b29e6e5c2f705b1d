//! HTTP surface of the Portico gateway: the middleware pipeline, the
//! router, and the shared application state.
//!
//! The binary entry point lives in `main.rs`; everything else is exported
//! so the integration test crate can assemble the full application
//! in-process.

pub mod middleware;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use router::build_router;
pub use state::AppState;
