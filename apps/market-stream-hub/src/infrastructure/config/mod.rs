//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_SYMBOLS, HubConfig, PersistenceBackend, ServerSettings,
};
