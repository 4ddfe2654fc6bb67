//! vianlp-service: line-delimited JSON front end for vianlp-core
//!
//! This crate provides:
//! - Protocol types for the stdin/stdout wire format
//! - TOML configuration with environment overrides
//! - The blocking request loop

pub mod config;
pub mod protocol;
pub mod server;

// Re-exports for convenience
pub use config::{default_config_path, load_config, Config};
pub use protocol::{
    EntityWire, ExtractionWire, MatchWire, MetadataWire, Request, Response, TableWire,
};
pub use server::{write_response, ServeStats, Server};

/// Notice written before the model is loaded
pub const STARTING_MESSAGE: &str = "NLP service starting...";

/// Notice written once the service accepts requests
pub const READY_MESSAGE: &str = "NLP service ready";
