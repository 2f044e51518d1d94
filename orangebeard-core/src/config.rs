//! # Configuration Module
//!
//! Loads the reporter settings from `orangebeard.toml` and `ORANGEBEARD_*`
//! environment variables.
//!
//! ## Configuration Loading Flow (block diagram)
//!
//! ```text
//! +---------------------+     +-------------------+     +-------------------+
//! | ORANGEBEARD_CONFIG  | --> | Path resolution   | --> | orangebeard.toml  |
//! | (optional)          |     | or walk up from ./|     |                   |
//! +---------------------+     +-------------------+     +-------------------+
//!                                                                |
//!                                                                v
//! +---------------------+     +-------------------+     +-------------------+
//! | ORANGEBEARD_* vars  | --> | override / append | --> | Config struct     |
//! | (and .env)          |     |                   |     | client + retry    |
//! +---------------------+     +-------------------+     +-------------------+
//! ```
//!
//! ## Configuration Structure
//!
//! ```toml
//! endpoint = "https://demo.orangebeard.app"
//! token = "0f9c6c2e-..."
//! project = "demo"
//! testset = "nightly"
//! attributes = [{ key = "env", value = "staging" }]
//!
//! [client]
//! log_batch_size = 10
//! await_timeout = "30s"
//! request_timeout = "30s"
//!
//! [retry]
//! attempts = 4
//! min_delay = "2s"
//! ```

use serde::Deserialize;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::*;

use crate::{entity::Attribute, masking, Error, Result};

/// Environment variable name for specifying the config file path.
const CONFIG_ENV: &str = "ORANGEBEARD_CONFIG";
const CONFIG_FILE: &str = "orangebeard.toml";
const ENV_PREFIX: &str = "ORANGEBEARD";

/// Reporter configuration.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    /// Base URL of the Orangebeard instance.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Listener access token.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    /// Name of the test set a started run reports under.
    #[serde(default)]
    pub testset: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Link back to the CI job. Reported as a `reference_url` attribute.
    #[serde(default)]
    pub reference_url: Option<String>,
    /// Id of an announced run to report into.
    #[serde(default)]
    pub testrun_uuid: Option<String>,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_deref().map(masking::mask_token))
            .field("project", &self.project)
            .field("testset", &self.testset)
            .field("description", &self.description)
            .field("attributes", &self.attributes)
            .field("reference_url", &self.reference_url)
            .field("testrun_uuid", &self.testrun_uuid)
            .field("client", &self.client)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Config {
    /// Load configuration from path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Config> {
        let Ok(buf) = std::fs::read_to_string(path) else {
            debug!("{path:?} not found, using default configuration");
            let mut cfg = Config::default();
            cfg.load_env();
            return Ok(cfg);
        };

        let mut cfg: Config = toml::from_str(&buf).map_err(|e| {
            Error::LoadError(format!(
                "failed to deserialize {path:?} into orangebeard::Config: {e}"
            ))
        })?;

        debug!("{path:?} was successfully loaded: {cfg:#?}");

        cfg.load_env();

        Ok(cfg)
    }

    /// Load configuration.
    ///
    /// Loading order:
    /// 1. If `ORANGEBEARD_CONFIG` env var is set, load from that path
    /// 2. Otherwise, the nearest `orangebeard.toml` in the current directory or its ancestors
    pub fn load() -> Result<Config> {
        let _ = dotenv::dotenv();

        match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let path = Path::new(&path);

                // Detect misuse: if it doesn't look like a file path, error out
                if path.extension().is_none_or(|ext| ext != "toml")
                    && !path.to_string_lossy().contains(std::path::MAIN_SEPARATOR)
                    && !path.to_string_lossy().contains('/')
                {
                    return Err(Error::LoadError(format!(
                        "{CONFIG_ENV} should be a path to a config file, not a config value. \
                         Got: {path:?}. Use {ENV_PREFIX}_<KEY>=value for config values instead."
                    )));
                }

                if !path.exists() {
                    return Err(Error::LoadError(format!(
                        "Config file specified by {CONFIG_ENV} not found: {path:?}"
                    )));
                }

                debug!("Loading config from {CONFIG_ENV}={path:?}");
                Config::load_from(path)
            }
            Err(_) => {
                let cwd = std::env::current_dir()
                    .map_err(|e| Error::LoadError(format!("failed to read current dir: {e}")))?;
                match discover(&cwd) {
                    Some(path) => Config::load_from(&path),
                    None => Config::load_from(Path::new(CONFIG_FILE)),
                }
            }
        }
    }

    /// Apply `ORANGEBEARD_*` environment overrides.
    ///
    /// Scalar keys replace the file value. `ORANGEBEARD_ATTRIBUTES` (`key:value;value`)
    /// is appended to the file attributes, and a reference URL is moved into a
    /// `reference_url` attribute.
    fn load_env(&mut self) {
        let var = |key: &str| std::env::var(format!("{ENV_PREFIX}_{key}")).ok();

        debug!("Loading configuration overrides from env");
        self.endpoint = var("ENDPOINT").or(self.endpoint.take());
        self.token = var("TOKEN").or(self.token.take());
        self.project = var("PROJECT").or(self.project.take());
        self.testset = var("TESTSET").or(self.testset.take());
        self.description = var("DESCRIPTION").or(self.description.take());
        self.testrun_uuid = var("TESTRUN_UUID").or(self.testrun_uuid.take());

        if let Some(attributes) = var("ATTRIBUTES") {
            self.attributes.extend(Attribute::parse_list(&attributes));
        }

        if let Some(reference_url) = var("REFERENCE_URL").or(self.reference_url.take()) {
            self.attributes
                .push(Attribute::new("reference_url", reference_url));
        }
    }

    /// Ensure the values needed to reach the listener are present.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<_> = [
            ("endpoint", &self.endpoint),
            ("token", &self.token),
            ("project", &self.project),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required values: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// Find the nearest `orangebeard.toml` walking up from `start`.
fn discover(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Tuning of the reporting client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Number of buffered logs that triggers a batch submission. `1` disables batching.
    #[serde(default = "default_log_batch_size")]
    pub log_batch_size: usize,
    /// Deadline for awaiting the resolution of a parent id.
    #[serde(default = "default_await_timeout")]
    #[serde(with = "humantime_serde")]
    pub await_timeout: Duration,
    /// Deadline for a single HTTP request, from connect to the end of the body.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_log_batch_size() -> usize {
    10
}

fn default_await_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            log_batch_size: default_log_batch_size(),
            await_timeout: default_await_timeout(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts per request, including the first one.
    #[serde(default)]
    pub attempts: Option<usize>,
    /// Factor to multiply the delay between retries.
    #[serde(default)]
    pub factor: Option<f32>,
    /// Whether to add jitter to the delay between retries.
    #[serde(default)]
    pub jitter: Option<bool>,
    /// Delay before the first retry.
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub min_delay: Option<Duration>,
    /// Maximum delay between retries.
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            attempts: Some(4),
            factor: Some(2.0),
            jitter: Some(false),
            min_delay: Some(Duration::from_secs(2)),
            max_delay: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryConfig {
    pub fn attempts(&self) -> usize {
        self.attempts.unwrap_or(4).max(1)
    }

    pub fn backoff(&self) -> backon::ExponentialBuilder {
        let builder = backon::ExponentialBuilder::new()
            .with_max_times(self.attempts() - 1)
            .with_factor(self.factor.unwrap_or(2.0))
            .with_min_delay(self.min_delay.unwrap_or(Duration::from_secs(2)))
            .with_max_delay(self.max_delay.unwrap_or(Duration::from_secs(60)));

        if self.jitter.unwrap_or_default() {
            builder.with_jitter()
        } else {
            builder
        }
    }
}
