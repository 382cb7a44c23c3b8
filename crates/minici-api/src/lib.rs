//! API server for minici.
//!
//! Provides the HTTP trigger and status API, GitHub webhook intake and the
//! WebSocket live event channel.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use state::AppState;

#[cfg(test)]
pub(crate) mod test_support;
