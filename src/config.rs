//! Daemon configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Where to look for the port number the nREPL server publishes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct DiscoveryConfig {
    /// Generic port file, relative to the project root.
    pub port_file: PathBuf,
    /// Port file written by the secondary build tool; checked first.
    pub build_tool_port_file: PathBuf,
    /// Host used for auto-connect and for endpoints with an empty host part.
    pub default_host: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port_file: PathBuf::from(".nrepl-port"),
            build_tool_port_file: PathBuf::from(".shadow-cljs/nrepl.port"),
            default_host: "localhost".into(),
        }
    }
}

/// Settings for the secondary dialect session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SecondaryConfig {
    /// Human-readable dialect name used in diagnostics.
    pub name: String,
    /// Expression evaluated to bootstrap the secondary REPL when no build
    /// target is involved.
    pub bootstrap_code: String,
    /// Name of the build tool that multiplexes named targets.
    pub build_tool: String,
    /// Build tool config file whose presence in the project root switches
    /// the negotiation to build-target selection.
    pub build_tool_config: PathBuf,
    /// Candidate build targets offered in the selection prompt.
    pub build_targets: Vec<String>,
    /// Marker the startup response value must contain after selecting a
    /// build target.
    pub selected_marker: String,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            name: "ClojureScript".into(),
            bootstrap_code: default_bootstrap_code(),
            build_tool: "shadow-cljs".into(),
            build_tool_config: PathBuf::from("shadow-cljs.edn"),
            build_targets: Vec::new(),
            selected_marker: ":selected".into(),
        }
    }
}

fn default_bootstrap_code() -> String {
    "(do (require 'figwheel-sidecar.repl-api) \
     (if (not (figwheel-sidecar.repl-api/figwheel-running?)) \
     (figwheel-sidecar.repl-api/start-figwheel!)) \
     (figwheel-sidecar.repl-api/cljs-repl))"
        .into()
}

/// Socket transport settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TransportConfig {
    /// Upper bound on establishing the TCP connection.
    pub connect_timeout_seconds: u64,
    /// Upper bound on waiting for the reply to a single request.
    pub request_timeout_seconds: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 10,
            request_timeout_seconds: 30,
        }
    }
}

fn default_ipc_name() -> String {
    "replmux".into()
}

fn default_output_history() -> usize {
    500
}

/// Configuration parsed from `replmux.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ReplConfig {
    /// Project root containing the port files and build tool config.
    pub project_root: PathBuf,
    /// Named pipe / Unix socket identifier for `replmux-ctl`.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Number of output-channel lines retained for the `output` command.
    #[serde(default = "default_output_history")]
    pub output_history: usize,
    /// Endpoint discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Secondary dialect settings.
    #[serde(default)]
    pub secondary: SecondaryConfig,
    /// Socket transport settings.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl ReplConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Absolute path to the project root.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.connect_timeout_seconds)
    }

    /// Per-request reply timeout as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.request_timeout_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.output_history == 0 {
            return Err(AppError::Config(
                "output_history must be greater than zero".into(),
            ));
        }

        if self.transport.connect_timeout_seconds == 0 {
            return Err(AppError::Config(
                "connect_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.transport.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.discovery.default_host.trim().is_empty() {
            return Err(AppError::Config("default_host must not be empty".into()));
        }

        if self.secondary.selected_marker.is_empty() {
            return Err(AppError::Config("selected_marker must not be empty".into()));
        }

        let canonical_root = self
            .project_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("project_root invalid: {err}")))?;
        self.project_root = canonical_root;

        Ok(())
    }
}
