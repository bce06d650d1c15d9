//! GitFusion - a provider-neutral HTTP API over Git hosting services
//!
//! GitFusion exposes one uniform read/trigger surface for repositories,
//! branches, organizations, pull requests, and CI pipelines across
//! GitHub, GitLab, and Bitbucket Cloud.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`api`] - HTTP boundary (routing, parameter validation, error mapping)
//! - [`services`] - Per-capability dispatchers plus their façade services
//! - [`providers`] - One adapter per upstream wire protocol
//! - [`cache`] - Sharded early-refresh TTL cache with single-flight fetches
//! - [`control_plane`] - Git Server records and credential secrets
//! - [`models`] - Unified data model and closed enumerations
//! - [`errors`] - Error taxonomy shared by every layer
//! - [`config`] - Environment-driven service configuration
//!
//! # Correctness Invariants
//!
//! 1. Provider-native enumeration strings never cross the adapter boundary
//! 2. Concurrent cache misses for one key produce exactly one upstream fetch
//! 3. A failed fetch is never admitted to the cache
//! 4. Reads go through the cache; single-repository gets and pipeline
//!    triggers go straight to the provider

pub mod api;
pub mod cache;
pub mod config;
pub mod control_plane;
pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
