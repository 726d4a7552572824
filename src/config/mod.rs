//! Layered configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (~/.config/certlane/config.toml)
//! 3. Project config (./certlane.toml)
//! 4. Command-line overrides

mod defaults;
mod effective;
mod merge;

pub use defaults::EngineConfig;
pub use effective::{
    user_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig,
    PROJECT_CONFIG_FILE,
};
pub use merge::{deep_merge, merge_layers};
