//! Service configuration.
//!
//! # Sources
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. Environment overrides: `STATEFILE`, `WORKPATH`, `BUILDROOT`, `SITEURL`,
//!    `BUILDSECRET`, `PORT`, `REMOTEURL`.
//! 3. `CONFIGFILE`: a JSON document whose keys supersede everything above.
//!    Keys it does not mention keep the value from steps 1–2.
//!
//! The environment is read through a lookup closure so tests never touch the
//! process environment; [`Config::from_env`] is the thin wrapper.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

pub const DEFAULT_SECRET: &str = "changeme";

pub const ENV_STATE_FILE: &str = "STATEFILE";
pub const ENV_WORK_PATH: &str = "WORKPATH";
pub const ENV_BUILD_ROOT: &str = "BUILDROOT";
pub const ENV_SITE_URL: &str = "SITEURL";
pub const ENV_SECRET: &str = "BUILDSECRET";
pub const ENV_PORT: &str = "PORT";
pub const ENV_REMOTE_URL: &str = "REMOTEURL";
pub const ENV_CONFIG_FILE: &str = "CONFIGFILE";

/// Immutable configuration handed to every component at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Mirror working tree.
    pub work_path: PathBuf,
    /// Root under which every ref gets its output directory.
    pub build_root: PathBuf,
    /// JSON build state file.
    pub state_file: PathBuf,
    pub remote_url: String,
    /// Base URL; the ref name is appended to form each site's `site_url`.
    pub site_url: String,
    pub secret: String,
    pub host: String,
    pub port: u16,
    #[serde(deserialize_with = "flag")]
    pub prune: bool,
    /// Debug-level logging unless `RUST_LOG` says otherwise.
    #[serde(deserialize_with = "flag")]
    pub debug: bool,
    /// Generation steps, relative to the working tree, run in order.
    pub generation_steps: Vec<PathBuf>,
    /// Site generator config file inherited by the per-ref derived config.
    pub base_config: PathBuf,
    /// Site generator executable.
    pub site_generator: String,
    pub step_timeout_secs: u64,
    pub git_timeout_secs: u64,
    pub max_concurrent_commit_builds: usize,
    /// Treat a failing site-build step as a failed build.
    #[serde(deserialize_with = "flag")]
    pub require_site_build_success: bool,
    pub reap_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_path: PathBuf::from("work"),
            build_root: PathBuf::from("/tmp/preview-bot/builds"),
            state_file: PathBuf::from("/tmp/build_state.json"),
            remote_url: "https://github.com/CSCfi/csc-user-guide".to_string(),
            site_url: "https://csc-guide-preview.rahtiapp.fi/".to_string(),
            secret: DEFAULT_SECRET.to_string(),
            host: "0.0.0.0".to_string(),
            port: 8081,
            prune: true,
            debug: true,
            generation_steps: [
                "generate_alpha.sh",
                "generate_by_system.sh",
                "generate_new.sh",
                "generate_glossary.sh",
            ]
            .into_iter()
            .map(|script| Path::new("scripts").join(script))
            .collect(),
            base_config: PathBuf::from("mkdocs.yml"),
            site_generator: "mkdocs".to_string(),
            step_timeout_secs: 30 * 60,
            git_timeout_secs: 10 * 60,
            max_concurrent_commit_builds: 2,
            require_site_build_success: false,
            reap_interval_secs: 30,
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(value) = lookup(ENV_STATE_FILE) {
            config.state_file = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_WORK_PATH) {
            config.work_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_BUILD_ROOT) {
            config.build_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_SITE_URL) {
            config.site_url = value;
        }
        if let Some(value) = lookup(ENV_SECRET) {
            config.secret = value;
        }
        if let Some(value) = lookup(ENV_REMOTE_URL) {
            config.remote_url = value;
        }
        if let Some(value) = lookup(ENV_PORT) {
            config.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ENV_PORT,
                    value,
                })?;
        }

        match lookup(ENV_CONFIG_FILE) {
            Some(path) => config.overlay_file(Path::new(&path)),
            None => Ok(config),
        }
    }

    /// Overlay the keys of a JSON config file on top of `self`.
    pub fn overlay_file(self, path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let overrides: serde_json::Map<String, Value> =
            serde_json::from_str(&contents).map_err(parse_err)?;
        let mut merged = match serde_json::to_value(&self).map_err(parse_err)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        merged.extend(overrides);
        serde_json::from_value(Value::Object(merged)).map_err(parse_err)
    }

    /// Reject configurations the service must not run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret == DEFAULT_SECRET {
            return Err(ConfigError::DefaultSecret);
        }
        if self.max_concurrent_commit_builds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "maxConcurrentCommitBuilds",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    /// `site_url` for a site published under `public_path`.
    pub fn public_url(&self, public_path: &str) -> String {
        format!("{}{}", self.site_url, public_path)
    }
}

/// Booleans arrive either as JSON booleans or as `"True"` / `"False"` strings.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected a boolean, got {other:?}"
            ))),
        },
    }
}
