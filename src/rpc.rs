//! Request/reply correlation.
//!
//! Every outgoing command travels in an `rpc_request` envelope whose `label`
//! is echoed back by FarmBot OS in its reply. On the pipe transport replies
//! arrive asynchronously and in any order, so the listener routes each one
//! to the waiter registered under its label.

use crate::celery::{CeleryScript, RPC_ERROR};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// How long a sender waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
/// How long opening a pipe may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Unclaimed replies are dropped once older than this many reply timeouts.
pub const EVICT_AFTER_TIMEOUTS: u32 = 3;
/// Label of the error log sent after a remote failure.
pub const RESPONSE_ERROR_LOG_LABEL: &str = "RESPONSE_ERROR_LOG";

/// Timeouts used by the correlator and the pipe transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcConfig {
    pub reply_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl RpcConfig {
    #[must_use]
    pub fn evict_after(&self) -> Duration {
        self.reply_timeout * EVICT_AFTER_TIMEOUTS
    }
}

/// Generate a fresh correlation label.
#[must_use]
pub fn new_label() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Outcome of dispatching one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The controller answered on the response pipe.
    Received(Value),
    /// The HTTP device API accepted the request.
    Accepted,
    /// Nothing was sent: no transport is configured.
    Echoed,
    /// No reply arrived before the deadline. The command was still sent.
    NoResponse,
}

impl Reply {
    /// Whether the controller explicitly rejected the request.
    #[must_use]
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, Self::Received(reply) if reply.get("kind").and_then(Value::as_str) == Some(RPC_ERROR))
    }

    /// Error message carried by an `rpc_error` reply, if any.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Received(reply) => reply
                .pointer("/body/0/args/message")
                .and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Result of [`crate::Device::dispatch`]: what was sent and what came back.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub envelope: CeleryScript,
    pub reply: Reply,
}

impl Dispatched {
    /// The label the command was sent under.
    #[must_use]
    pub fn label(&self) -> &str {
        self.envelope.label().unwrap_or_default()
    }

    /// The inner command.
    #[must_use]
    pub fn command(&self) -> Option<&CeleryScript> {
        self.envelope.unwrap_rpc()
    }
}

struct Waiter {
    token: u64,
    tx: oneshot::Sender<Value>,
}

#[derive(Default)]
struct Table {
    /// Waiters per label, oldest first.
    waiters: HashMap<String, VecDeque<Waiter>>,
    unclaimed: HashMap<String, (Instant, Value)>,
    next_token: u64,
    closed: bool,
}

impl Table {
    fn remove_waiter(&mut self, label: &str, token: u64) {
        if let Some(queue) = self.waiters.get_mut(label) {
            queue.retain(|w| w.token != token);
            if queue.is_empty() {
                self.waiters.remove(label);
            }
        }
    }
}

/// Routing table from correlation label to the task awaiting that reply.
///
/// Several waiters may share a label; replies go to them in registration
/// order. A reply whose waiter already gave up (or never registered) is
/// parked and evicted once older than `evict_after`.
#[derive(Clone)]
pub struct PendingReplies {
    table: Arc<Mutex<Table>>,
    evict_after: Duration,
}

impl PendingReplies {
    #[must_use]
    pub fn new(evict_after: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::default())),
            evict_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the reply for `label`.
    ///
    /// Register before sending so a fast reply cannot be missed. Once the
    /// table is closed the waiter resolves to [`Error::ResponseClosed`].
    #[must_use]
    pub fn register(&self, label: &str) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        let mut table = self.lock();
        let token = table.next_token;
        table.next_token += 1;
        if let Some((_, reply)) = table.unclaimed.remove(label) {
            let _ = tx.send(reply);
        } else if !table.closed {
            table
                .waiters
                .entry(label.to_string())
                .or_default()
                .push_back(Waiter { token, tx });
        }
        ReplyWaiter {
            label: label.to_string(),
            token,
            rx,
            pending: self.clone(),
        }
    }

    /// Hand a reply to the oldest waiter on `label`.
    pub fn deliver(&self, label: &str, mut reply: Value) {
        let mut table = self.lock();
        while let Some(waiter) = table.waiters.get_mut(label).and_then(VecDeque::pop_front) {
            match waiter.tx.send(reply) {
                Ok(()) => {
                    debug!("Routed reply for {}", label);
                    table.remove_waiter(label, waiter.token);
                    return;
                }
                Err(returned) => reply = returned,
            }
        }
        table.waiters.remove(label);
        debug!("Parking unclaimed reply for {}", label);
        table.unclaimed.insert(label.to_string(), (Instant::now(), reply));
        Self::sweep_locked(&mut table, self.evict_after);
    }

    /// Stop accepting waiters and fail every registered one.
    ///
    /// Called when the response pipe is gone for good.
    pub fn close(&self) {
        let mut table = self.lock();
        table.closed = true;
        let dropped: usize = table.waiters.drain().map(|(_, queue)| queue.len()).sum();
        if dropped > 0 {
            warn!("Failing {} waiters: response pipe closed", dropped);
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drop unclaimed replies older than the eviction window.
    pub fn sweep(&self) {
        let mut table = self.lock();
        Self::sweep_locked(&mut table, self.evict_after);
    }

    fn sweep_locked(table: &mut Table, max_age: Duration) {
        let before = table.unclaimed.len();
        table
            .unclaimed
            .retain(|_, (arrived, _)| arrived.elapsed() < max_age);
        let evicted = before - table.unclaimed.len();
        if evicted > 0 {
            warn!("Evicted {} unclaimed replies", evicted);
        }
    }

    fn cancel(&self, label: &str, token: u64) {
        self.lock().remove_waiter(label, token);
    }

    /// Number of registered waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.lock().waiters.values().map(VecDeque::len).sum()
    }

    /// Number of parked replies nobody has claimed.
    #[must_use]
    pub fn unclaimed(&self) -> usize {
        self.lock().unclaimed.len()
    }

    /// Wait up to `timeout` for the reply to `label`.
    pub async fn wait_for(&self, label: &str, timeout: Duration) -> Result<Reply> {
        self.register(label).wait(timeout).await
    }
}

/// A registered interest in one reply. Dropping it unregisters the waiter.
pub struct ReplyWaiter {
    label: String,
    token: u64,
    rx: oneshot::Receiver<Value>,
    pending: PendingReplies,
}

impl ReplyWaiter {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolve to the reply, or [`Reply::NoResponse`] once `timeout` elapses.
    ///
    /// Fails with [`Error::ResponseClosed`] if the table is closed first.
    pub async fn wait(mut self, timeout: Duration) -> Result<Reply> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(reply)) => Ok(Reply::Received(reply)),
            Ok(Err(_)) => {
                debug!("Reply channel for {} closed", self.label);
                Err(Error::ResponseClosed)
            }
            Err(_) => {
                debug!("No reply for {} within {:?}", self.label, timeout);
                Ok(self.expire())
            }
        }
    }

    /// Give up on the reply without losing one that raced the deadline.
    fn expire(&mut self) -> Reply {
        // Unregister first: anything delivered after this is parked,
        // anything delivered before is already in the channel.
        self.pending.cancel(&self.label, self.token);
        self.rx
            .try_recv()
            .map_or(Reply::NoResponse, Reply::Received)
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.pending.cancel(&self.label, self.token);
    }
}
