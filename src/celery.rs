//! Celery Script nodes: the command vocabulary spoken to FarmBot OS.
//!
//! Every command is a node of the shape `{kind, args, body?}`. Outgoing
//! commands are wrapped in an `rpc_request` envelope whose `label` is used to
//! match the eventual reply.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of the envelope wrapping every outgoing command.
pub const RPC_REQUEST: &str = "rpc_request";
/// Reply kind for a successfully executed request.
pub const RPC_OK: &str = "rpc_ok";
/// Reply kind for a rejected or failed request.
pub const RPC_ERROR: &str = "rpc_error";

/// A single Celery Script node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeleryScript {
    /// Node kind, e.g. `move_absolute` or `pair`.
    pub kind: String,
    /// Kind-specific arguments.
    pub args: Map<String, Value>,
    /// Ordered child nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<CeleryScript>>,
}

impl CeleryScript {
    /// Build a node without a body.
    pub fn new(kind: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            args,
            body: None,
        }
    }

    /// Build a node with an ordered body.
    pub fn with_body(
        kind: impl Into<String>,
        args: Map<String, Value>,
        body: Vec<Self>,
    ) -> Self {
        Self {
            kind: kind.into(),
            args,
            body: Some(body),
        }
    }

    /// Look up a single argument.
    #[must_use]
    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// The `label` argument, if present and a string.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.arg("label").and_then(Value::as_str)
    }

    /// Serialize into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut node = Map::new();
        node.insert("kind".into(), Value::String(self.kind.clone()));
        node.insert("args".into(), Value::Object(self.args.clone()));
        if let Some(body) = &self.body {
            node.insert(
                "body".into(),
                Value::Array(body.iter().map(Self::to_value).collect()),
            );
        }
        Value::Object(node)
    }

    /// Unwrap the single inner command of an `rpc_request` envelope.
    #[must_use]
    pub fn unwrap_rpc(&self) -> Option<&Self> {
        if self.kind != RPC_REQUEST {
            return None;
        }
        self.body.as_ref().and_then(|body| body.first())
    }
}

/// Wrap a command in an `rpc_request` envelope carrying `label`.
#[must_use]
pub fn rpc_wrapper(command: CeleryScript, label: &str) -> CeleryScript {
    let mut args = Map::new();
    args.insert("label".into(), Value::String(label.to_string()));
    CeleryScript::with_body(RPC_REQUEST, args, vec![command])
}

/// Check that an arbitrary JSON value is a well-formed Celery Script node.
///
/// Requires a string `kind`, an object `args`, and, when `body` is present,
/// an array whose elements are themselves well-formed nodes.
pub fn validate(node: &Value) -> Result<CeleryScript> {
    let Some(object) = node.as_object() else {
        return Err(Error::validation("celery script", node));
    };
    let kind = match object.get("kind") {
        Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
        _ => return Err(Error::validation("celery script", node)),
    };
    let Some(Value::Object(args)) = object.get("args") else {
        return Err(Error::validation("celery script", node));
    };
    let body = match object.get("body") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(items.iter().map(validate).collect::<Result<Vec<_>>>()?),
        Some(other) => return Err(Error::validation(kind, other)),
    };
    Ok(CeleryScript {
        kind,
        args: args.clone(),
        body,
    })
}

/// Parse and validate a Celery Script node from JSON text.
pub fn parse(text: &str) -> Result<CeleryScript> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::MalformedScript(e.to_string()))?;
    validate(&value)
}
