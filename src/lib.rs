//! farmware-tools — Celery Script client for FarmBot Farmware
//!
//! Builds and validates Celery Script commands, sends them to FarmBot OS over
//! the legacy HTTP device API or the framed v8 pipes, and correlates replies
//! by label.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod celery;
pub mod cli;
pub mod color;
pub mod commands;
pub mod device;
pub mod env;
pub mod error;
pub mod frame;
pub mod rpc;
pub mod testing;
pub mod transport;

pub use celery::{CeleryScript, rpc_wrapper};
pub use cli::{Cli, Command, parse_key_value};
pub use device::Device;
pub use env::{Env, FarmbotOsVersion, TransportConfig, WebAppCredentials};
pub use error::{Error, Result};
pub use rpc::{Dispatched, PendingReplies, Reply, RpcConfig};
pub use testing::{FakeController, FakeDeviceApi, ReplyPolicy};
pub use transport::Transport;
