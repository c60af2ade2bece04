//! Secondary dialect session negotiation.
//!
//! A secondary session is a clone of the primary session that has been
//! switched into the secondary dialect's REPL. For build-tool projects that
//! means selecting a build target; otherwise a configured bootstrap form is
//! evaluated in the clone.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};

use crate::discovery;
use crate::orchestrator::Orchestrator;
use crate::prompt::Prompter;
use crate::protocol::{find_field, Request, Response, SessionId};
use crate::transport::Transport;
use crate::{AppError, Result};

/// How a secondary negotiation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecondaryOutcome {
    /// A secondary REPL is running in `session`.
    Started {
        /// The cloned session now speaking the secondary dialect.
        session: SessionId,
        /// Build target it was attached to, if any.
        build_target: Option<String>,
    },
    /// The clone or the REPL startup failed.
    Failed,
    /// The user dismissed the build target prompt.
    Cancelled,
}

impl Orchestrator {
    /// Replace the secondary session with a freshly negotiated one.
    ///
    /// The ambiguous slot follows the secondary if it pointed there. The old
    /// secondary session is closed on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotConnected` when no primary session is live.
    pub async fn recreate_secondary_session(&self, prompter: &dyn Prompter) -> Result<SecondaryOutcome> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let transport = {
            let state = self.inner.state.lock().await;
            state.transport.as_ref().map(|handle| Arc::clone(&handle.transport))
        };
        let (Some(primary), Some(transport)) = (self.primary_session().await, transport) else {
            return Err(AppError::NotConnected(
                "connect before starting a secondary REPL".into(),
            ));
        };

        let outcome = self
            .make_secondary_session_clone(&transport, &primary, None, prompter)
            .instrument(info_span!("recreate_secondary", primary = %primary))
            .await;

        if let SecondaryOutcome::Started {
            session,
            build_target,
        } = &outcome
        {
            let replaced = self
                .install_secondary(&primary, session.clone(), build_target.clone())
                .await;
            if let Some(Some(previous)) = replaced {
                match self
                    .exchange(transport.as_ref(), Request::close_session(&previous))
                    .await
                {
                    Ok(_) => debug!(session_id = %previous, "replaced secondary session closed"),
                    Err(err) => {
                        warn!(session_id = %previous, %err, "closing replaced secondary session failed");
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Clone `primary` and start the secondary REPL in the clone.
    ///
    /// Without an explicit `build_target`, build-tool projects ask
    /// `prompter` to pick one first. On failure the recorded target is
    /// cleared and the reason goes to the output channel; on success the
    /// target is recorded by [`install_secondary`](Self::install_secondary).
    /// The primary connection is never touched.
    pub(crate) async fn make_secondary_session_clone(
        &self,
        transport: &Arc<dyn Transport>,
        primary: &SessionId,
        build_target: Option<String>,
        prompter: &dyn Prompter,
    ) -> SecondaryOutcome {
        let config = &self.inner.config.secondary;

        let build_target = match build_target {
            Some(target) => Some(target),
            None if discovery::uses_build_tool(&self.inner.config) => {
                self.say(&format!(
                    "This looks like a {} coding session.",
                    config.build_tool
                ));
                let candidates = self.inner.build_targets.build_targets().unwrap_or_else(|err| {
                    warn!(%err, "listing build targets failed");
                    Vec::new()
                });
                match prompter.select_build_target(&candidates).await {
                    Some(target) => Some(target),
                    None => {
                        info!("build target selection cancelled");
                        return SecondaryOutcome::Cancelled;
                    }
                }
            }
            None => None,
        };

        let session = match self
            .exchange(transport.as_ref(), Request::clone_session(Some(primary)))
            .await
        {
            Ok(responses) => find_field(&responses, "new-session").and_then(Response::new_session),
            Err(err) => {
                warn!(%err, "secondary clone request failed");
                None
            }
        };
        let Some(session) = session else {
            self.say(&format!(
                "Failed to clone nREPL session for {} REPL",
                config.name
            ));
            return SecondaryOutcome::Failed;
        };

        let request = match &build_target {
            Some(target) => Request::start_secondary_repl(&session, target),
            None => Request::eval(&config.bootstrap_code, &session),
        };
        let responses = self.exchange(transport.as_ref(), request).await.unwrap_or_else(|err| {
            warn!(%err, "secondary startup request failed");
            Vec::new()
        });

        let started = match &build_target {
            Some(_) => find_field(&responses, "value")
                .and_then(Response::value)
                .is_some_and(|value| value.contains(&config.selected_marker)),
            None => find_field(&responses, "ns").is_some(),
        };

        if started {
            info!(session_id = %session, build_target = ?build_target, "secondary REPL started");
            return SecondaryOutcome::Started {
                session,
                build_target,
            };
        }

        self.update(|state| state.secondary_build_target = None).await;
        warn!(session_id = %session, build_target = ?build_target, "secondary REPL did not start");
        match &build_target {
            Some(target) => self.say(&format!(
                "Failed starting {} REPL for {} build: {target}. Is the build running and connected?",
                config.name, config.build_tool
            )),
            None => self.say(&format!(
                "Failed to start {} REPL with command: {}. Is the app running and connected?",
                config.name, config.bootstrap_code
            )),
        }

        if let Err(err) = self
            .exchange(transport.as_ref(), Request::close_session(&session))
            .await
        {
            debug!(session_id = %session, %err, "closing unused clone failed");
        }
        SecondaryOutcome::Failed
    }

    /// Record `session`, started against `build_target`, as the secondary
    /// session of `primary`.
    ///
    /// Returns `None` and leaves the state untouched when `primary` is no
    /// longer the live primary session, otherwise the secondary session it
    /// replaced.
    pub(crate) async fn install_secondary(
        &self,
        primary: &SessionId,
        session: SessionId,
        build_target: Option<String>,
    ) -> Option<Option<SessionId>> {
        let previous = self
            .update(|state| {
                if !state.connected || state.primary_session.as_ref() != Some(primary) {
                    return None;
                }
                let previous = state.secondary_session.replace(session.clone());
                state.secondary_build_target = build_target;
                if previous.is_some() && state.ambiguous_session == previous {
                    state.ambiguous_session = Some(session.clone());
                }
                Some(previous)
            })
            .await;

        match &previous {
            Some(_) => {
                info!(session_id = %session, "secondary session established");
                self.say("Connected session: secondary");
            }
            None => debug!(session_id = %session, "primary changed during negotiation, secondary dropped"),
        }
        previous
    }
}
