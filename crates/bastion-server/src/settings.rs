//! Process configuration.
//!
//! Loaded once at startup from an optional `bastion.toml` next to the
//! working directory, then overridden by `BASTION__`-prefixed environment
//! variables (`BASTION__DATABASE__URL`, `BASTION__AUTHZ__JOBS__MAX_ATTEMPTS`,
//! ...). Every section falls back to its defaults.

use std::path::Path;

use bastion_authz::AuthzConfig;
use bastion_db::DbConfig;
use config::{Environment, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "bastion.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub database: DbConfig,
    pub authz: AuthzConfig,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();
        let mut builder = config::Config::builder();

        if path.is_file() {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        builder
            .add_source(
                Environment::with_prefix("BASTION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
