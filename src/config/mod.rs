//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MessagingConfig (validated, immutable)
//!     → shared via Arc inside MessagingContext
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AgentConfig, MessageConfig, MessagingConfig, ObservabilityConfig, ProxyConfig, ResilienceConfig,
    ServiceTimeout,
};
pub use validation::{validate_config, ValidationError};
