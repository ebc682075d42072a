pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, load_config_sync, load_config_with_env};
pub use models::*;
pub use validation::{ServerConfigValidator, ValidationError, ValidationResult};

/// Annotated configuration written by `lms-gateway init`.
pub const EXAMPLE_CONFIG: &str = include_str!("../../config.example.toml");
