//! The device facade Farmware talks to.
//!
//! [`Device`] validates a command, wraps it in an `rpc_request` envelope,
//! sends it over the active transport, and (on the pipe transport) waits for
//! the matching reply. Remote failures are also logged back to the
//! operator's dashboard before being returned to the caller.

use crate::celery::{self, CeleryScript};
use crate::color;
use crate::commands;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::rpc::{self, Dispatched, Reply, RpcConfig};
use crate::transport::{HttpTransport, Transport};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Client for FarmBot OS.
pub struct Device {
    transport: Transport,
    state_api: Option<HttpTransport>,
    rpc: RpcConfig,
}

impl Device {
    /// Connect using the transport the environment selects.
    pub async fn connect(env: &Env) -> Result<Self> {
        Self::connect_with(env, RpcConfig::default()).await
    }

    /// Connect with explicit timeouts.
    pub async fn connect_with(env: &Env, rpc: RpcConfig) -> Result<Self> {
        let config = env.transport()?;
        let transport = Transport::connect(&config, rpc).await?;
        let state_api = match &transport {
            Transport::Legacy(http) => Some(http.clone()),
            _ => env
                .device_api()
                .map(|(url, token)| HttpTransport::new(url, token))
                .transpose()?,
        };
        info!("Using {} transport", transport.name());
        Ok(Self {
            transport,
            state_api,
            rpc,
        })
    }

    /// A device that only echoes commands.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            transport: Transport::Offline,
            state_api: None,
            rpc: RpcConfig::default(),
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send a command under a freshly generated label.
    pub async fn dispatch(&self, command: CeleryScript) -> Result<Dispatched> {
        let label = rpc::new_label();
        self.dispatch_labeled(command, &label).await
    }

    /// Send a command under a caller-supplied label.
    ///
    /// A reply timeout is not an error: the command has already been sent
    /// and the result carries [`Reply::NoResponse`].
    pub async fn dispatch_labeled(&self, command: CeleryScript, label: &str) -> Result<Dispatched> {
        let envelope = celery::rpc_wrapper(command, label);
        // Re-check the full tree; callers may have built it by hand.
        celery::validate(&envelope.to_value())?;

        match self.send_envelope(&envelope).await {
            Ok(reply) if reply.is_rpc_error() => {
                let kind = envelope
                    .unwrap_rpc()
                    .map_or_else(String::new, |c| c.kind.clone());
                let message = reply.error_message().unwrap_or("rpc_error").to_string();
                let err = Error::Remote {
                    endpoint: kind,
                    status: message,
                };
                self.log_remote_error(label, &err).await;
                Err(err)
            }
            Ok(reply) => Ok(Dispatched { envelope, reply }),
            Err(err @ Error::Remote { .. }) => {
                self.log_remote_error(label, &err).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Validate and send an arbitrary JSON Celery Script node.
    pub async fn send_celery_script(&self, node: &Value) -> Result<Dispatched> {
        let command = celery::validate(node)?;
        self.dispatch(command).await
    }

    async fn send_envelope(&self, envelope: &CeleryScript) -> Result<Reply> {
        match &self.transport {
            Transport::Offline => {
                let shown = envelope.unwrap_rpc().unwrap_or(envelope);
                println!("{}", color::colorize_celery_script(shown));
                Ok(Reply::Echoed)
            }
            Transport::Legacy(http) => {
                http.post_celery_script(&envelope.to_value()).await?;
                Ok(Reply::Accepted)
            }
            Transport::Piped(pipe) => {
                let label = envelope.label().unwrap_or_default();
                let waiter = pipe.pending().register(label);
                pipe.send(&envelope.to_value()).await?;
                waiter.wait(self.rpc.reply_timeout).await
            }
        }
    }

    /// Post an error log for a failed request, once.
    ///
    /// The log goes out under [`rpc::RESPONSE_ERROR_LOG_LABEL`]; a failure of
    /// that log itself is not reported again.
    async fn log_remote_error(&self, failed_label: &str, err: &Error) {
        if failed_label == rpc::RESPONSE_ERROR_LOG_LABEL {
            return;
        }
        warn!("{}", err);
        let message = capitalize(&err.to_string());
        let Ok(log) = commands::send_message(&message, "error", &[]) else {
            return;
        };
        let envelope = celery::rpc_wrapper(log, rpc::RESPONSE_ERROR_LOG_LABEL);
        if let Err(e) = self.send_envelope(&envelope).await {
            debug!("Error log was not delivered: {}", e);
        }
    }

    /// Report an error: print it locally and, when a controller is
    /// reachable, log it to the dashboard as well.
    pub async fn report(&self, err: &Error) {
        eprintln!("{}", color::error(&capitalize(&err.to_string())));
        let remote = matches!(
            err,
            Error::Validation { .. } | Error::MalformedScript(_) | Error::Unavailable(_)
        );
        if remote && !self.transport.is_offline() {
            self.log_remote_error("", err).await;
        }
    }

    /// Post a log message through `send_message`.
    pub async fn log(&self, message: &str, message_type: &str, channels: &[&str]) -> Result<Dispatched> {
        self.dispatch(commands::send_message(message, message_type, channels)?)
            .await
    }

    /// Fetch the device state tree.
    pub async fn get_bot_state(&self) -> Result<Value> {
        let Some(http) = &self.state_api else {
            return Err(Error::Unavailable(
                "Device info could not be retrieved.".into(),
            ));
        };
        match http.get_bot_state().await {
            Err(err @ Error::Remote { .. }) => {
                self.log_remote_error("", &err).await;
                Err(err)
            }
            other => other,
        }
    }

    /// Current position: the whole position for `all`, else one axis.
    pub async fn get_current_position(&self, axis: &str) -> Result<Option<Value>> {
        commands::check_axis("get_current_position", axis)?;
        let state = self.get_bot_state().await?;
        Ok(position_from_state(&state, axis))
    }

    /// Value of a pin as last reported in the device state.
    pub async fn get_pin_value(&self, pin_number: i64) -> Result<Option<Value>> {
        let state = self.get_bot_state().await?;
        Ok(pin_value_from_state(&state, pin_number))
    }
}

/// Extract a position from a device state tree.
#[must_use]
pub fn position_from_state(state: &Value, axis: &str) -> Option<Value> {
    let position = state.pointer("/location_data/position")?;
    let value = if axis == "all" {
        position.clone()
    } else {
        position.get(axis)?.clone()
    };
    if value.is_null() {
        debug!("Position `{}` value unknown.", axis);
        return None;
    }
    Some(value)
}

/// Extract a pin value from a device state tree.
#[must_use]
pub fn pin_value_from_state(state: &Value, pin_number: i64) -> Option<Value> {
    let value = state.pointer(&format!("/pins/{pin_number}/value")).cloned();
    if value.is_none() {
        debug!("Pin `{}` value unknown.", pin_number);
    }
    value
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> Value {
        json!({
            "location_data": {"position": {"y": 1, "z": 0}},
            "pins": {"13": {"value": 1}}
        })
    }

    #[test]
    fn test_position_from_state() {
        assert_eq!(position_from_state(&state(), "all"), Some(json!({"y": 1, "z": 0})));
        assert_eq!(position_from_state(&state(), "x"), None);
        assert_eq!(position_from_state(&state(), "y"), Some(json!(1)));
        assert_eq!(position_from_state(&json!({}), "all"), None);
    }

    #[test]
    fn test_pin_value_from_state() {
        assert_eq!(pin_value_from_state(&state(), 14), None);
        assert_eq!(pin_value_from_state(&state(), 13), Some(json!(1)));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("invalid arg"), "Invalid arg");
        assert_eq!(capitalize(""), "");
    }

    #[tokio::test]
    async fn test_offline_dispatch_echoes() {
        let device = Device::offline();
        let dispatched = device
            .dispatch_labeled(commands::take_photo(), "abcd")
            .await
            .expect("echo");
        assert_eq!(dispatched.reply, Reply::Echoed);
        assert_eq!(dispatched.label(), "abcd");
        assert_eq!(dispatched.command(), Some(&commands::take_photo()));
    }

    #[tokio::test]
    async fn test_offline_generates_distinct_labels() {
        let device = Device::offline();
        let a = device.dispatch(commands::sync()).await.expect("echo");
        let b = device.dispatch(commands::sync()).await.expect("echo");
        assert_ne!(a.label(), b.label());
        assert!(!a.label().is_empty());
    }

    #[tokio::test]
    async fn test_offline_send_rejects_malformed_script() {
        let device = Device::offline();
        let err = device
            .send_celery_script(&json!({"kind": "sync"}))
            .await
            .expect_err("missing args");
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_offline_state_unavailable() {
        let device = Device::offline();
        assert!(matches!(
            device.get_bot_state().await,
            Err(Error::Unavailable(_))
        ));
        assert!(matches!(
            device.get_current_position("w").await,
            Err(Error::Validation { .. })
        ));
    }
}
