//! # Configuration
//!
//! Server configuration: defaults, optional YAML/JSON file loading, and
//! environment-variable overrides.

pub mod server;
