//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::resilience::ResiliencySession;

/// Connection and timing configuration for the orchestrator under test,
/// derived from environment variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, Eq, OrthoConfig, PartialEq)]
#[ortho_config(prefix = "SHAKEDOWN")]
pub struct MasterConfig {
    /// Base URL of the orchestrator's JSON gateway. Required.
    pub master_url: String,
    /// Bearer token presented on every request, when the gateway requires
    /// authentication.
    pub token: Option<String>,
    /// Deadline for the software-installation stage, in seconds.
    #[ortho_config(default = 3600)]
    pub software_timeout_secs: u64,
    /// Deadline for the instance-start stage, in seconds.
    #[ortho_config(default = 3600)]
    pub instance_timeout_secs: u64,
    /// Pause between lifecycle ticks, in seconds.
    #[ortho_config(default = 30)]
    pub tick_interval_secs: u64,
}

/// Resiliency-suite configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, Eq, OrthoConfig, PartialEq)]
#[ortho_config(prefix = "SHAKEDOWN")]
pub struct ResilienceConfig {
    /// Naming scheme of the clone set (clone `i` is `namebase + i`).
    pub namebase: String,
    /// Name of the root instance whose connection parameters locate the
    /// current primary.
    #[ortho_config(default = "root".to_owned())]
    pub root_instance_name: String,
    /// Total number of instances, primary included.
    #[ortho_config(default = 3)]
    pub total_instance_count: u32,
    /// Replication window waited out before each takeover, in seconds.
    #[ortho_config(default = 900)]
    pub replication_wait_secs: u64,
    /// Connection parameter holding the probed instance's address.
    #[ortho_config(default = "ipv6".to_owned())]
    pub probe_address_key: String,
    /// Port the probe endpoint listens on inside the instance.
    #[ortho_config(default = 10080)]
    pub probe_port: u16,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in shakedown.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl MasterConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("shakedown")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when the master URL is empty,
    /// or [`ConfigError::Invalid`] when a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.master_url,
            &FieldMetadata::new(
                "orchestrator gateway URL",
                "SHAKEDOWN_MASTER_URL",
                "master_url",
                "master",
            ),
        )?;
        for (name, value) in [
            ("software_timeout_secs", self.software_timeout_secs),
            ("instance_timeout_secs", self.instance_timeout_secs),
            ("tick_interval_secs", self.tick_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

impl ResilienceConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("shakedown")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::Invalid`] when the instance count leaves no clone
    /// to promote.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.namebase,
            &FieldMetadata::new(
                "clone naming scheme",
                "SHAKEDOWN_NAMEBASE",
                "namebase",
                "resilience",
            ),
        )?;
        require_field(
            &self.probe_address_key,
            &FieldMetadata::new(
                "probe address parameter",
                "SHAKEDOWN_PROBE_ADDRESS_KEY",
                "probe_address_key",
                "resilience",
            ),
        )?;
        if self.total_instance_count < 2 {
            return Err(ConfigError::Invalid(format!(
                "total_instance_count {} leaves no clone to test",
                self.total_instance_count
            )));
        }
        Ok(())
    }

    /// Builds a [`ResiliencySession`] for `release_url` deployed on
    /// `node_id` and driven from `partition_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_session(
        &self,
        release_url: &str,
        node_id: &str,
        partition_id: &str,
    ) -> Result<ResiliencySession, ConfigError> {
        self.validate()?;
        let session = ResiliencySession {
            release_url: release_url.to_owned(),
            node_id: node_id.to_owned(),
            partition_id: partition_id.to_owned(),
            namebase: self.namebase.clone(),
            root_instance_name: self.root_instance_name.clone(),
            total_instance_count: self.total_instance_count,
        };
        session
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        Ok(session)
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration value: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
