//! Engram Common - shared foundations for the Engram memory system.
//!
//! Provides the pieces every Engram crate needs:
//! - Typed error taxonomy (`MemoryError`) with retry classification
//! - Configuration loading with env-var overrides
//! - Structured logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AgentConfig, EmbeddingConfig, EngramConfig, GraphConfig, IngestionConfig, LoggingConfig,
    RetrievalConfig, VectorConfig,
};
pub use error::{MemoryError, Result};
pub use logging::init_logging;
