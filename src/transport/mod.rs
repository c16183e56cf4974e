//! Ways a command can leave this process.
//!
//! Chosen once from the [`TransportConfig`]: the legacy HTTP device API,
//! the framed v8 pipes, or offline echo when neither is configured.

mod http;
mod pipe;

pub use http::{BOT_STATE_ENDPOINT, CELERY_SCRIPT_ENDPOINT, HttpTransport};
pub use pipe::PipeTransport;

use crate::env::TransportConfig;
use crate::error::Result;
use crate::rpc::RpcConfig;

/// The active transport.
pub enum Transport {
    /// Print commands instead of sending them.
    Offline,
    Legacy(HttpTransport),
    Piped(PipeTransport),
}

impl Transport {
    /// Connect the transport described by `config`.
    ///
    /// Opening the pipes is bounded by `rpc.connect_timeout`; failure to
    /// connect is an error rather than a fallback to offline echo.
    pub async fn connect(config: &TransportConfig, rpc: RpcConfig) -> Result<Self> {
        match config {
            TransportConfig::Offline => Ok(Self::Offline),
            TransportConfig::Legacy { base_url, token } => {
                Ok(Self::Legacy(HttpTransport::new(base_url.clone(), token.clone())?))
            }
            TransportConfig::Piped { request, response } => {
                Ok(Self::Piped(PipeTransport::connect(request, response, rpc).await?))
            }
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Legacy(_) => "legacy",
            Self::Piped(_) => "piped",
        }
    }

    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}
