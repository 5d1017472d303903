// shm-config: TOML-based configuration with environment variable overrides.

pub mod config;
pub mod env;
pub mod schema;

pub use config::{default_config_path, load_config, load_from_file, validate_config, ConfigError};
pub use env::apply_env_overrides;
pub use schema::{BruteSection, Config, DataEncoding, JournalSection, SessionsSection, TopSection};
