//! Configuration loading.
//!
//! Sources, later ones winning:
//! 1. built-in defaults (`Settings::default()`)
//! 2. `config/default.{toml,json,yaml}` if present, or an explicit file
//! 3. environment variables prefixed `WORKQ_`, sections separated by `__`
//!    (`WORKQ_SERVER__PORT=9000`, `WORKQ_STORAGE__PATH=/var/lib/workq`)

mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    LoggingSettings, PartialSettings, ServerSettings, Settings, StorageSettings,
};

const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Load settings from the default file location and the environment.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Load settings, reading `path` instead of the default file. An explicit
/// path must exist.
pub fn load_config_from(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    let config = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("WORKQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    Ok(partial.merge_onto(Settings::default()))
}
