//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SinkConfig (validated, immutable)
//!     → read once at startup by the server frontend
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    BodyMode, BodyRewriteConfig, DecodeErrorPolicy, HeaderMode, InstructionConfig,
    ListenerConfig, LogFormat, ModeOverrideConfig, ObservabilityConfig, ShutdownConfig,
    SinkConfig,
};
