//! Caller-supplied prompts and build target sources.
//!
//! Connecting may need two answers from a human: the endpoint to connect
//! to and, for build-tool projects, which build target the secondary REPL
//! should attach to. The orchestrator asks through [`Prompter`]; a `None`
//! answer means the user cancelled.

use std::future::Future;
use std::pin::Pin;

use crate::config::ReplConfig;
use crate::Result;

/// Answers interactive questions during a connect sequence.
pub trait Prompter: Send + Sync {
    /// Ask for a `host:port` endpoint. `prefill` is the suggested text,
    /// e.g. `localhost:7888`.
    fn endpoint(&self, prefill: &str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;

    /// Ask which of `candidates` the secondary REPL should attach to.
    fn select_build_target(
        &self,
        candidates: &[String],
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>>;
}

/// Answers every prompt from values supplied up front.
///
/// Used by the IPC server, where the companion CLI passes the answers as
/// command fields. An unset answer behaves like a cancelled prompt.
#[derive(Debug, Clone, Default)]
pub struct PresetPrompter {
    /// Endpoint returned from [`Prompter::endpoint`].
    pub endpoint: Option<String>,
    /// Build target returned from [`Prompter::select_build_target`].
    pub build_target: Option<String>,
}

impl Prompter for PresetPrompter {
    fn endpoint(&self, _prefill: &str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async move { self.endpoint.clone() })
    }

    fn select_build_target(
        &self,
        candidates: &[String],
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        let chosen = self.build_target.clone().or_else(|| match candidates {
            [only] => Some(only.clone()),
            _ => None,
        });
        Box::pin(async move { chosen })
    }
}

/// Cancels every prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn endpoint(&self, _prefill: &str) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async { None })
    }

    fn select_build_target(
        &self,
        _candidates: &[String],
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + '_>> {
        Box::pin(async { None })
    }
}

/// Supplies the build targets offered in the selection prompt.
pub trait BuildTargets: Send + Sync {
    /// Current candidate build targets.
    ///
    /// # Errors
    ///
    /// Implementations reading the build tool's own config may fail with
    /// `AppError::Io` or `AppError::Config`.
    fn build_targets(&self) -> Result<Vec<String>>;
}

/// Serves the `secondary.build_targets` list from config.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredBuildTargets(Vec<String>);

impl ConfiguredBuildTargets {
    /// Wrap an explicit list of targets.
    #[must_use]
    pub fn new(targets: Vec<String>) -> Self {
        Self(targets)
    }

    /// Take the list from `config`.
    #[must_use]
    pub fn from_config(config: &ReplConfig) -> Self {
        Self(config.secondary.build_targets.clone())
    }
}

impl BuildTargets for ConfiguredBuildTargets {
    fn build_targets(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}
