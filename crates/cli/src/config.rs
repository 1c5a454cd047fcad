//! `hooksync.toml` loading and validation.
//!
//! The file is deserialised into [`HooksyncConfig`], a direct mirror of the
//! TOML, and then converted into [`Settings`], whose fields are already the
//! domain types the rest of the binary works with. Everything that can be
//! wrong with the file is reported by that conversion, at start-up.

use std::collections::{BTreeSet, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;
use uuid::Uuid;
use webhooks::{
    CallbackUrl, CredentialRef, EventType, HookSecretConfig, RepositoryIdentity,
    SignatureAlgorithm, Target, TargetName,
};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "hooksync.toml";

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("could not read '{path}': {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("could not parse '{path}': {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_duplicate_ttl_secs() -> u64 {
    webhooks::DEFAULT_DUPLICATE_TTL.as_secs()
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_queue_capacity() -> usize {
    manager::DEFAULT_QUEUE_CAPACITY
}

fn default_api_url() -> String {
    github::DEFAULT_API_URL.to_string()
}

fn default_true() -> bool {
    true
}

/// Raw contents of `hooksync.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HooksyncConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub callback_url: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_duplicate_ttl_secs")]
    pub duplicate_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Fixed identity for self-test responses; random per start when absent.
    #[serde(default)]
    pub instance_id: Option<Uuid>,
    #[serde(default)]
    pub secret: Option<SecretConfig>,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// `[secret]`: the global webhook secret.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    pub credential_env: String,
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
}

/// `[[servers]]`: one GitHub API endpoint and its credential.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_true")]
    pub manage_hooks: bool,
    #[serde(default)]
    pub credential_env: Option<String>,
}

/// `[[targets]]`: a consumer and the repositories it builds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default)]
    pub secret_algorithm: SignatureAlgorithm,
}

/// A validated server entry.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub name: String,
    pub api_url: Url,
    pub manage_hooks: bool,
    pub credential: Option<CredentialRef>,
}

/// A validated target entry.
#[derive(Debug, Clone)]
pub struct TargetSettings {
    pub target: Target,
    pub events: BTreeSet<EventType>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub callback: CallbackUrl,
    pub state_dir: PathBuf,
    pub duplicate_ttl: Duration,
    pub sweep_interval: Duration,
    pub queue_capacity: usize,
    pub instance_id: Option<Uuid>,
    pub global_secret: Option<HookSecretConfig>,
    pub servers: Vec<ServerSettings>,
    pub targets: Vec<TargetSettings>,
}

impl Settings {
    /// Returns `true` if any delivery will be signature-checked.
    pub fn has_any_secret(&self) -> bool {
        self.global_secret.is_some() || self.targets.iter().any(|t| t.target.secret.is_some())
    }
}

/// Reads and validates the configuration at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content).map_err(|err| match err {
        ParseFailure::Toml(source) => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Invalid(err) => err,
    })
}

enum ParseFailure {
    Toml(toml::de::Error),
    Invalid(ConfigError),
}

fn parse(content: &str) -> Result<Settings, ParseFailure> {
    let raw: HooksyncConfig = toml::from_str(content).map_err(ParseFailure::Toml)?;
    raw.validate().map_err(ParseFailure::Invalid)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

fn credential(field: &str, value: &str) -> Result<CredentialRef, ConfigError> {
    CredentialRef::new(value).ok_or_else(|| invalid(format!("{field} must not be empty")))
}

impl HooksyncConfig {
    /// Converts the raw file into [`Settings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(self) -> Result<Settings, ConfigError> {
        let listen: SocketAddr = self
            .listen
            .parse()
            .map_err(|err| invalid(format!("listen address '{}': {err}", self.listen)))?;
        let callback = CallbackUrl::new(self.callback_url)
            .ok_or_else(|| invalid("callback_url must not be empty"))?;

        for (name, value) in [
            ("duplicate_ttl_secs", self.duplicate_ttl_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("queue_capacity", self.queue_capacity as u64),
        ] {
            if value == 0 {
                return Err(invalid(format!("{name} must be positive")));
            }
        }

        let global_secret = self
            .secret
            .map(|s| {
                Ok::<_, ConfigError>(HookSecretConfig {
                    credential: credential("secret.credential_env", &s.credential_env)?,
                    algorithm: s.algorithm,
                })
            })
            .transpose()?;

        if self.servers.is_empty() {
            return Err(invalid("at least one [[servers]] entry is required"));
        }
        let mut server_names = HashSet::new();
        let servers = self
            .servers
            .into_iter()
            .map(|server| {
                if !server_names.insert(server.name.clone()) {
                    return Err(invalid(format!("duplicate server name '{}'", server.name)));
                }
                let api_url = Url::parse(&server.api_url).map_err(|err| {
                    invalid(format!("server '{}' api_url '{}': {err}", server.name, server.api_url))
                })?;
                let credential = server
                    .credential_env
                    .as_deref()
                    .map(|env| credential("servers.credential_env", env))
                    .transpose()?;
                Ok(ServerSettings {
                    name: server.name,
                    api_url,
                    manage_hooks: server.manage_hooks,
                    credential,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let mut target_names = HashSet::new();
        let targets = self
            .targets
            .into_iter()
            .map(|target| {
                let name = TargetName::new(target.name.as_str())
                    .ok_or_else(|| invalid("target name must not be empty"))?;
                if !target_names.insert(name.clone()) {
                    return Err(invalid(format!("duplicate target name '{name}'")));
                }
                target_settings(name, target)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Settings {
            listen,
            callback,
            state_dir: self.state_dir,
            duplicate_ttl: Duration::from_secs(self.duplicate_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            queue_capacity: self.queue_capacity,
            instance_id: self.instance_id,
            global_secret,
            servers,
            targets,
        })
    }
}

fn target_settings(name: TargetName, raw: TargetConfig) -> Result<TargetSettings, ConfigError> {
    let mut repositories: Vec<RepositoryIdentity> = Vec::new();
    for url in &raw.repositories {
        match RepositoryIdentity::parse(url) {
            Some(repo) if !repositories.contains(&repo) => repositories.push(repo),
            Some(_) => {}
            None => warn!(target = %name, url = %url, "Skipping unparsable repository URL"),
        }
    }

    let events: BTreeSet<EventType> = raw.events.iter().map(|e| EventType::from_wire(e)).collect();
    for event in events.iter().filter(|e| !e.is_routable()) {
        warn!(target = %name, event = %event, "Event type is not recognised and will never be routed");
    }

    let secret = raw
        .secret_env
        .as_deref()
        .map(|env| {
            Ok::<_, ConfigError>(HookSecretConfig {
                credential: credential("targets.secret_env", env)?,
                algorithm: raw.secret_algorithm,
            })
        })
        .transpose()?;

    let mut target = Target::new(name, repositories);
    target.secret = secret;
    Ok(TargetSettings { target, events })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
