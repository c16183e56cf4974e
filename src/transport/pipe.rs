//! Framed-message transport over the FarmBot OS v8 pipes.
//!
//! Requests are written as frames to the request socket. A single listener
//! task owns the response socket for the lifetime of the transport and
//! routes every decoded reply to [`PendingReplies`] by its `args.label`.

use crate::error::{Error, Result};
use crate::frame;
use crate::rpc::{PendingReplies, RpcConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connected request/response pipe pair.
pub struct PipeTransport {
    request_path: PathBuf,
    /// Serializes writers so frames never interleave.
    writer: Mutex<UnixStream>,
    pending: PendingReplies,
    shutdown_tx: broadcast::Sender<()>,
    listener: JoinHandle<()>,
}

impl PipeTransport {
    /// Open both pipes and start the response listener.
    pub async fn connect(request: &Path, response: &Path, config: RpcConfig) -> Result<Self> {
        let writer = open(request, config.connect_timeout).await?;
        let reader = open(response, config.connect_timeout).await?;
        info!(
            "Connected to request pipe {:?} and response pipe {:?}",
            request, response
        );

        let pending = PendingReplies::new(config.evict_after());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listener = tokio::spawn(listen(reader, pending.clone(), shutdown_rx));

        Ok(Self {
            request_path: request.to_path_buf(),
            writer: Mutex::new(writer),
            pending,
            shutdown_tx,
            listener,
        })
    }

    /// Table the listener delivers replies into.
    #[must_use]
    pub const fn pending(&self) -> &PendingReplies {
        &self.pending
    }

    /// Whether the response listener is still running.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        !self.listener.is_finished()
    }

    /// Write one framed message. Does not wait for a reply.
    ///
    /// Fails without writing once the response listener has stopped.
    pub async fn send(&self, message: &Value) -> Result<()> {
        if self.pending.is_closed() {
            return Err(Error::ResponseClosed);
        }
        let mut writer = self.writer.lock().await;
        debug!("Writing frame to {:?}", self.request_path);
        frame::write_frame(&mut *writer, message).await
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn open(path: &Path, timeout: Duration) -> Result<UnixStream> {
    let address = path.display().to_string();
    match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(Error::Connect { address, source }),
        Err(_) => Err(Error::ConnectTimeout(address)),
    }
}

/// Read replies until the pipe closes, the stream loses framing, or
/// shutdown is requested. Waiters still registered then fail.
async fn listen(
    mut reader: UnixStream,
    pending: PendingReplies,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = frame::read_frame(&mut reader) => {
                match result {
                    Ok(Some(reply)) => route(&pending, reply),
                    Ok(None) => {
                        info!("Response pipe closed");
                        break;
                    }
                    // The whole frame was consumed, so the stream is still in step.
                    Err(Error::Deserialize(e)) => {
                        warn!("Dropping reply frame with invalid JSON: {}", e);
                    }
                    Err(e) => {
                        error!("Response pipe error: {}", e);
                        break;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Response listener shutting down");
                break;
            }
        }
    }
    pending.close();
}

fn route(pending: &PendingReplies, reply: Value) {
    let label = reply
        .pointer("/args/label")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    match label {
        Some(label) => pending.deliver(&label, reply),
        None => warn!("Dropping reply without a label: {}", reply),
    }
}
