//! Endpoint discovery and validation.
//!
//! The nREPL server advertises its listening port by writing a decimal
//! port number into a file under the project root. The secondary build
//! tool writes its own port file, which takes precedence over the generic
//! one when present.

use std::fmt::{Display, Formatter};
use std::fs;
use std::path::PathBuf;

use tracing::debug;

use crate::config::ReplConfig;
use crate::{AppError, Result};

/// A validated `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub hostname: String,
    /// TCP port, never zero.
    pub port: u16,
}

impl Endpoint {
    /// Parse a `host:port` string as typed by the user.
    ///
    /// An empty host part resolves to `default_host`. The port must be an
    /// integer in `1..=65535`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadEndpoint` when there is no `:` separator or the
    /// port part is not a valid port number.
    pub fn parse(url: &str, default_host: &str) -> Result<Self> {
        let mut parts = url.trim().split(':');
        let hostname = parts.next().unwrap_or_default().trim();
        let Some(port_part) = parts.next() else {
            return Err(AppError::BadEndpoint(format!("missing port in '{url}'")));
        };

        let port = parse_port(port_part)
            .ok_or_else(|| AppError::BadEndpoint(format!("invalid port in '{url}'")))?;

        let hostname = if hostname.is_empty() {
            default_host.to_owned()
        } else {
            hostname.to_owned()
        };

        Ok(Self { hostname, port })
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Parse a decimal port number in `1..=65535`.
fn parse_port(raw: &str) -> Option<u16> {
    let value: u32 = raw.trim().parse().ok()?;
    u16::try_from(value).ok().filter(|port| *port > 0)
}

/// Path of the port file to read.
///
/// The build tool's port file wins when it exists; otherwise the generic
/// project-root port file is returned whether or not it exists.
#[must_use]
pub fn port_file_path(config: &ReplConfig) -> PathBuf {
    let root = config.project_root();
    let build_tool_file = root.join(&config.discovery.build_tool_port_file);
    if build_tool_file.exists() {
        build_tool_file
    } else {
        root.join(&config.discovery.port_file)
    }
}

/// Read the published port, if any.
///
/// Returns `Ok(None)` when no port file exists.
///
/// # Errors
///
/// Returns `AppError::Discovery` if the file exists but cannot be read or
/// does not contain a valid port number.
pub fn discover_port(config: &ReplConfig) -> Result<Option<u16>> {
    let path = port_file_path(config);
    if !path.exists() {
        debug!(path = %path.display(), "no port file");
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| AppError::Discovery(format!("cannot read {}: {err}", path.display())))?;

    let port = parse_port(&raw).ok_or_else(|| {
        AppError::Discovery(format!(
            "{} does not contain a port number: '{}'",
            path.display(),
            raw.trim()
        ))
    })?;

    debug!(path = %path.display(), port, "port file read");
    Ok(Some(port))
}

/// Whether the project is driven by the secondary build tool, which needs a
/// build target chosen before a secondary REPL can start.
#[must_use]
pub fn uses_build_tool(config: &ReplConfig) -> bool {
    config
        .project_root()
        .join(&config.secondary.build_tool_config)
        .exists()
}
