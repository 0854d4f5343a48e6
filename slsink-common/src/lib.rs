//! # slsink Common Library
//!
//! Shared code for the sink crates:
//! - Error type
//! - TOML bootstrap configuration and sink parameters
//! - Event types (SinkEvent enum) and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use config::{LoggingConfig, SinkConfig, TomlConfig, WritePolicy};
pub use error::{Error, Result};
pub use events::{EventBus, LifecycleState, SinkEvent};
