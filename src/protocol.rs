//! nREPL request builders and response accessors.
//!
//! Requests are flat JSON objects carrying an `op`, an optional `session`
//! and op-specific fields. The transport assigns the correlation `id`.
//! A single request may be answered by several response fragments; the
//! exchange ends with a fragment whose `status` list contains `"done"`.
//!
//! | Builder                  | Op            | Interesting response keys |
//! |--------------------------|---------------|---------------------------|
//! | [`Request::clone_session`]   | `clone`       | `new-session`         |
//! | [`Request::close_session`]   | `close`       | `status`              |
//! | [`Request::list_sessions`]   | `ls-sessions` | `sessions`            |
//! | [`Request::eval`]            | `eval`        | `value`, `ns`, `err`  |
//! | [`Request::start_secondary_repl`] | `eval`   | `value`               |
//! | [`Request::info`]            | `info`        | `doc`, `arglists-str` |

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// Opaque session token issued by the server on clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a raw session token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token as sent on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound protocol message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Operation name.
    pub op: String,
    /// Correlation id; filled in by the transport when sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Session the request is scoped to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    /// Op-specific fields.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl Request {
    fn new(op: &str, session: Option<&SessionId>) -> Self {
        Self {
            op: op.to_owned(),
            id: None,
            session: session.cloned(),
            params: Map::new(),
        }
    }

    fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_owned(), value.into());
        self
    }

    /// Create a new session, inheriting the bindings of `parent` when given.
    #[must_use]
    pub fn clone_session(parent: Option<&SessionId>) -> Self {
        Self::new("clone", parent)
    }

    /// Close `session` on the server.
    #[must_use]
    pub fn close_session(session: &SessionId) -> Self {
        Self::new("close", Some(session))
    }

    /// Ask the server which sessions it currently considers live.
    #[must_use]
    pub fn list_sessions() -> Self {
        Self::new("ls-sessions", None)
    }

    /// Evaluate `code` in `session`.
    #[must_use]
    pub fn eval(code: &str, session: &SessionId) -> Self {
        Self::new("eval", Some(session)).with_param("code", code)
    }

    /// Switch `session` into the secondary REPL of build target `target`.
    #[must_use]
    pub fn start_secondary_repl(session: &SessionId, target: &str) -> Self {
        let code = format!("(shadow.cljs.devtools.api/nrepl-select :{target})");
        Self::eval(&code, session)
    }

    /// Look up documentation for `symbol` as resolved from namespace `ns`.
    #[must_use]
    pub fn info(session: &SessionId, ns: &str, symbol: &str) -> Self {
        Self::new("info", Some(session))
            .with_param("ns", ns)
            .with_param("symbol", symbol)
    }

    /// The `code` field of an eval request.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.params.get("code").and_then(Value::as_str)
    }
}

/// One inbound response fragment.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Response(Map<String, Value>);

impl Response {
    /// Interpret a decoded JSON value as a response fragment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if `value` is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(AppError::Protocol(format!(
                "response fragment is not an object: {other}"
            ))),
        }
    }

    /// Raw field access.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Correlation id echoed by the server.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }

    /// Session id produced by a clone.
    #[must_use]
    pub fn new_session(&self) -> Option<SessionId> {
        self.str_field("new-session").map(SessionId::new)
    }

    /// Live session ids reported by `ls-sessions`.
    #[must_use]
    pub fn sessions(&self) -> Option<Vec<SessionId>> {
        let list = self.0.get("sessions")?.as_array()?;
        Some(
            list.iter()
                .filter_map(Value::as_str)
                .map(SessionId::new)
                .collect(),
        )
    }

    /// Printed evaluation result.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.str_field("value")
    }

    /// Namespace the evaluation ended in.
    #[must_use]
    pub fn ns(&self) -> Option<&str> {
        self.str_field("ns")
    }

    /// Status flags carried by this fragment.
    #[must_use]
    pub fn status(&self) -> Vec<&str> {
        self.0
            .get("status")
            .and_then(Value::as_array)
            .map(|flags| flags.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether this fragment terminates its exchange.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status().contains(&"done")
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

/// First fragment in `responses` that carries `key`.
#[must_use]
pub fn find_field<'a>(responses: &'a [Response], key: &str) -> Option<&'a Response> {
    responses.iter().find(|r| r.get(key).is_some())
}
