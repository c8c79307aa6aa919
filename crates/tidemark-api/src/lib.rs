//! HTTP surface for the tidemark executor.
//!
//! Exposes the signal webhook and read-only reporting endpoints. Business
//! failures are reported inside the `{success, message, data}` envelope with
//! HTTP 200; only transport concerns (auth, malformed JSON) use error
//! status codes.

pub mod config;
pub mod server;

pub use config::ApiConfig;
pub use server::{create_router, serve, ApiState};
