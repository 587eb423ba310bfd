//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DaemonConfig (validated, immutable)
//!     → held in an ArcSwap by the daemon
//!
//! On SIGHUP:
//!     signal bridge runs the reload handler on the reactor
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<DaemonConfig>
//!     → listener restarted if its settings changed
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{DaemonConfig, ListenerConfig, ObservabilityConfig};
pub use validation::{validate_config, ValidationError};
