//! # Redis Ingest Shared Library
//!
//! This crate contains the configuration, event model and Redis plumbing
//! shared by the ingestion worker and its tests.
//!
//! ## Module Organization
//!
//! - `config`: Input configuration (file plus `REDIS_INPUT_*` environment)
//! - `events`: Event model, decoration and payload codecs
//! - `redis`: Broker connection seam, Redis client, batch script and the
//!   in-memory broker used by tests

pub mod config;
pub mod events;
pub mod redis;

/// Current version of the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
