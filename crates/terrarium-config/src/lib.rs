mod raw;
mod loader;
pub mod error;

pub use error::ConfigError;
pub use loader::{load_config, ApiConfig, TerrariumConfig, DEFAULT_CONFIG_FILE};
