//! zabsync keeps a Zabbix deployment synchronized with external sources of
//! truth about which hosts exist, what properties they carry, and which
//! operators own them.
//!
//! # Overview
//! Host records flow through a fixed pipeline of long-running workers:
//!
//! - Source collectors invoke pluggable strategies and emit validated host
//!   batches onto bounded queues
//! - The source handler upserts each source's hosts into `hosts_source`
//! - The source merger folds per-source rows into canonical hosts, runs the
//!   modifier chain, and maintains the `hosts` table
//! - Three reconcilers drive Zabbix hosts, host groups, and templates
//!   toward the merged state, gated by a failsafe
//!
//! The supervisor owns the workers, the stop flag, and the health snapshot.

/// Source collector plugin contract, registry, and built-in strategies
pub mod collectors;

/// TOML configuration model
pub mod config;

/// The relational store and its embedded migrations
pub mod db;

/// Rolling error counter used as a circuit breaker by the workers
pub mod errcount;

/// Error types and handling
pub mod error;

/// Health snapshot written by the supervisor
pub mod health;

/// The host data model and merge rules
pub mod models;

/// Host modifier plugin contract, registry, and built-in strategies
pub mod modifiers;

/// The pipeline workers
pub mod processing;

/// Worker startup, liveness monitoring, and shutdown
pub mod supervisor;

/// Map-file parsing and small shared helpers
pub mod utils;

/// Thin client for the Zabbix JSON-RPC API
pub mod zabbix;

pub use config::Settings;
pub use error::ZabError;
pub use models::{Host, Interface, SourceHosts};
