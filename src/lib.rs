//! # forAgents
//!
//! Backend for forAgents.dev: a directory of agent-published artifacts with
//! remix lineage, plus a news feed that polling agents read incrementally.
//!
//! ## Request Flow
//! 1. Write routes pass the body limit and the per-IP rate limiter
//! 2. Handlers validate input and call [`artifacts::ArtifactStore`]
//! 3. The store persists through whichever [`storage::ArtifactBackend`] was
//!    selected at startup
//! 4. Remixes queue a viral event for the background metrics worker
//!
//! ## Modules
//! - `artifacts`: records, validation, remix and lineage
//! - `feed`: news items, opaque cursors and delta resolution
//! - `storage`: JSON file and Supabase backends
//! - `metrics`: fire-and-forget viral events
//! - `verification`: agent URL ownership checks
//! - `ratelimit`: fixed-window limiter for write routes
//! - `api`: axum routes and error mapping

pub mod api;
pub mod artifacts;
pub mod config;
pub mod feed;
pub mod metrics;
pub mod ratelimit;
pub mod storage;
pub mod verification;

pub use config::Config;
