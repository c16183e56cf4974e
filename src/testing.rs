//! Test doubles for the controller side of both transports.
//!
//! ```ignore
//! let controller = FakeController::start().await;
//! let device = Device::connect(&controller.env()).await?;
//!
//! device.dispatch(commands::take_photo()).await?;
//! assert_eq!(controller.requests().await.len(), 1);
//! ```

use crate::env::{
    FARMWARE_TOKEN_VAR, FARMWARE_URL_VAR, FBOS_VERSION_VAR, REQUEST_PIPE_VAR, RESPONSE_PIPE_VAR,
};
use crate::{Env, frame};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// How the fake controller answers each request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPolicy {
    /// Reply `rpc_ok`.
    Ok,
    /// Reply `rpc_error` carrying this explanation.
    Error(String),
    /// Never reply.
    Silent,
}

struct ControllerState {
    requests: Vec<Value>,
    policy: ReplyPolicy,
    response: Option<UnixStream>,
}

/// A stand-in for FarmBot OS on the v8 request/response pipes.
pub struct FakeController {
    request_path: PathBuf,
    response_path: PathBuf,
    state: Arc<Mutex<ControllerState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FakeController {
    /// Bind both pipes under unique `/tmp` paths.
    ///
    /// # Panics
    ///
    /// Panics if the sockets cannot be bound.
    pub async fn start() -> Self {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        let request_path = PathBuf::from(format!("/tmp/farmware-test-{pid}-{id}-request.sock"));
        let response_path = PathBuf::from(format!("/tmp/farmware-test-{pid}-{id}-response.sock"));
        std::fs::remove_file(&request_path).ok();
        std::fs::remove_file(&response_path).ok();

        let request_listener = UnixListener::bind(&request_path).expect("bind request pipe");
        let response_listener = UnixListener::bind(&response_path).expect("bind response pipe");

        let state = Arc::new(Mutex::new(ControllerState {
            requests: Vec::new(),
            policy: ReplyPolicy::Ok,
            response: None,
        }));

        let response_state = Arc::clone(&state);
        let response_task = tokio::spawn(async move {
            if let Ok((stream, _)) = response_listener.accept().await {
                debug!("Fake controller: response pipe connected");
                response_state.lock().await.response = Some(stream);
            }
        });

        let request_state = Arc::clone(&state);
        let request_task = tokio::spawn(async move {
            while let Ok((stream, _)) = request_listener.accept().await {
                let state = Arc::clone(&request_state);
                tokio::spawn(handle_requests(stream, state));
            }
        });

        Self {
            request_path,
            response_path,
            state,
            tasks: vec![response_task, request_task],
        }
    }

    /// An environment pointing a v8 client at this controller.
    #[must_use]
    pub fn env(&self) -> Env {
        Env::from_vars([
            (FBOS_VERSION_VAR.to_string(), "8.0.0".to_string()),
            (REQUEST_PIPE_VAR.to_string(), self.request_path.display().to_string()),
            (RESPONSE_PIPE_VAR.to_string(), self.response_path.display().to_string()),
        ])
    }

    pub async fn set_policy(&self, policy: ReplyPolicy) {
        self.state.lock().await.policy = policy;
    }

    /// Envelopes received so far, in arrival order.
    pub async fn requests(&self) -> Vec<Value> {
        self.state.lock().await.requests.clone()
    }

    /// Write an arbitrary frame to the response pipe.
    ///
    /// # Panics
    ///
    /// Panics if the client never connected its response pipe.
    pub async fn push_reply(&self, reply: &Value) {
        write_reply(&self.state, reply)
            .await
            .expect("response pipe connected");
    }

    /// Write raw bytes to the response pipe, e.g. a frame with a broken
    /// payload.
    ///
    /// # Panics
    ///
    /// Panics if the client never connected its response pipe.
    pub async fn push_raw(&self, bytes: &[u8]) {
        write_raw(&self.state, bytes)
            .await
            .expect("response pipe connected");
    }

    /// Drop the response pipe connection, as a crashing controller would.
    pub async fn close_response(&self) {
        self.state.lock().await.response = None;
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        std::fs::remove_file(&self.request_path).ok();
        std::fs::remove_file(&self.response_path).ok();
    }
}

/// Build the controller's reply for a request envelope.
#[must_use]
pub fn reply_for(request: &Value, policy: &ReplyPolicy) -> Option<Value> {
    let label = request.pointer("/args/label").cloned().unwrap_or(Value::Null);
    match policy {
        ReplyPolicy::Ok => Some(json!({"kind": "rpc_ok", "args": {"label": label}})),
        ReplyPolicy::Error(message) => Some(json!({
            "kind": "rpc_error",
            "args": {"label": label},
            "body": [{"kind": "explanation", "args": {"message": message}}]
        })),
        ReplyPolicy::Silent => None,
    }
}

async fn handle_requests(mut stream: UnixStream, state: Arc<Mutex<ControllerState>>) {
    while let Ok(Some(request)) = frame::read_frame(&mut stream).await {
        let reply = {
            let mut guard = state.lock().await;
            guard.requests.push(request.clone());
            reply_for(&request, &guard.policy)
        };
        if let Some(reply) = reply {
            if write_reply(&state, &reply).await.is_err() {
                debug!("Fake controller: no response pipe for reply");
            }
        }
    }
}

async fn write_reply(state: &Arc<Mutex<ControllerState>>, reply: &Value) -> Result<(), ()> {
    let bytes = frame::encode(reply).map_err(|_| ())?;
    write_raw(state, &bytes).await
}

async fn write_raw(state: &Arc<Mutex<ControllerState>>, bytes: &[u8]) -> Result<(), ()> {
    // The client opens the request pipe first; give the response pipe a moment.
    for _ in 0..200 {
        let mut guard = state.lock().await;
        if let Some(stream) = guard.response.as_mut() {
            stream.write_all(bytes).await.map_err(|_| ())?;
            return stream.flush().await.map_err(|_| ());
        }
        drop(guard);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(())
}

/// One request seen by [`FakeDeviceApi`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    /// Label of the `rpc_request` envelope in the body, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.body.as_ref()?.pointer("/args/label")?.as_str()
    }
}

struct DeviceApiState {
    requests: Vec<RecordedRequest>,
    responses: VecDeque<(u16, Value)>,
}

/// A stand-in for the pre-v8 HTTP device API on a loopback port.
///
/// Answers queued `(status, body)` pairs in order, then `200 {}`.
pub struct FakeDeviceApi {
    base_url: String,
    state: Arc<Mutex<DeviceApiState>>,
    task: JoinHandle<()>,
}

impl FakeDeviceApi {
    /// # Panics
    ///
    /// Panics if no loopback port can be bound.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(Mutex::new(DeviceApiState {
            requests: Vec::new(),
            responses: VecDeque::new(),
        }));
        let server_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&server_state);
                tokio::spawn(async move {
                    if let Err(e) = serve_http(stream, state).await {
                        debug!("Fake device API: {}", e);
                    }
                });
            }
        });
        Self {
            base_url: format!("http://{addr}/"),
            state,
            task,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// An environment pointing a legacy client at this API.
    #[must_use]
    pub fn env(&self, token: &str) -> Env {
        Env::from_vars([
            (FBOS_VERSION_VAR, "7.0.0"),
            (FARMWARE_URL_VAR, self.base_url.as_str()),
            (FARMWARE_TOKEN_VAR, token),
        ])
    }

    /// Queue the next response.
    pub async fn respond_with(&self, status: u16, body: Value) {
        self.state.lock().await.responses.push_back((status, body));
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }
}

impl Drop for FakeDeviceApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_http(stream: TcpStream, state: Arc<Mutex<DeviceApiState>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0;
    let mut authorization = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "authorization" => authorization = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    let body = serde_json::from_slice(&body).ok();

    let (status, response) = {
        let mut guard = state.lock().await;
        guard.requests.push(RecordedRequest {
            method,
            path,
            authorization,
            body,
        });
        guard.responses.pop_front().unwrap_or((200, json!({})))
    };

    let payload = response.to_string();
    let reason = if status == 200 { "OK" } else { "Error" };
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        payload.len()
    );
    let mut stream = reader.into_inner();
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(payload.as_bytes()).await?;
    stream.shutdown().await
}
