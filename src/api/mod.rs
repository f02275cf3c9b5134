//! HTTP API.

pub mod artifacts;
pub mod error;
pub mod feed;
pub mod routes;
pub mod verify;

pub use routes::{app, serve, AppState};
