//! Per-server MCP protocol client.
//!
//! One client per configured server, speaking stdio (spawned child),
//! streamable HTTP, or SSE. Calls carry a per-invocation deadline; hitting
//! it drops the in-flight RPC but leaves the connection up. stdio calls
//! serialize (one stdin writer); remote transports allow a bounded number
//! of concurrent calls.

use mcpr_core::{Result, RouterError, ServerRecord, TransportKind};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult, Prompt,
    ReadResourceRequestParam, ReadResourceResult, Resource, Tool,
};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use std::future::Future;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Mutex, Semaphore};

use crate::ring::StderrRing;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const STOP_GRACE: Duration = Duration::from_secs(5);
pub const RESTART_BACKOFF_INITIAL_MS: u64 = 100;
pub const RESTART_BACKOFF_MAX_MS: u64 = 30_000;
pub const RESTART_MAX_ATTEMPTS: u32 = 3;
/// Client-side cap on concurrent in-flight calls for remote transports.
const REMOTE_CONCURRENCY: usize = 8;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How a connection is established, derived from the server record.
#[derive(Debug, Clone)]
pub enum ClientDescriptor {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    Remote {
        kind: TransportKind,
        url: String,
    },
}

impl ClientDescriptor {
    pub fn from_record(record: &ServerRecord) -> Result<Self> {
        record.validate()?;
        match record.transport {
            TransportKind::Stdio => Ok(Self::Stdio {
                command: record.command.clone().unwrap_or_default(),
                args: record.args.clone(),
                env: record.env.clone(),
            }),
            kind @ (TransportKind::Http | TransportKind::Sse) => Ok(Self::Remote {
                kind,
                url: record.url.clone().unwrap_or_default(),
            }),
        }
    }
}

/// Child exit observed by the monitor task (`None` until exit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub code: Option<i32>,
}

enum CallGate {
    /// stdio: one stdin writer, calls serialize.
    Serial(Mutex<()>),
    /// http/sse: concurrent up to the cap.
    Concurrent(Semaphore),
}

struct Active {
    service: RunningService<RoleClient, ()>,
    child: Option<Arc<Mutex<tokio::process::Child>>>,
    child_pid: Option<u32>,
}

pub struct McpClient {
    server_name: String,
    descriptor: ClientDescriptor,
    default_timeout: Duration,
    state: Mutex<Option<Active>>,
    gate: CallGate,
    stderr: StderrRing,
    exit_tx: watch::Sender<Option<ChildExit>>,
    /// Set while a deliberate stop is in progress so the exit monitor
    /// does not report the planned exit.
    stopping: Arc<AtomicBool>,
    /// Delay before the next in-place reconnect; doubles on failure up
    /// to [`RESTART_BACKOFF_MAX_MS`], resets on a successful call.
    restart_backoff: StdMutex<Duration>,
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, descriptor: ClientDescriptor) -> Self {
        let gate = match &descriptor {
            ClientDescriptor::Stdio { .. } => CallGate::Serial(Mutex::new(())),
            ClientDescriptor::Remote { .. } => {
                CallGate::Concurrent(Semaphore::new(REMOTE_CONCURRENCY))
            }
        };
        let (exit_tx, _) = watch::channel(None);
        Self {
            server_name: server_name.into(),
            descriptor,
            default_timeout: DEFAULT_CALL_TIMEOUT,
            state: Mutex::new(None),
            gate,
            stderr: StderrRing::new(),
            exit_tx,
            stopping: Arc::new(AtomicBool::new(false)),
            restart_backoff: StdMutex::new(Duration::from_millis(RESTART_BACKOFF_INITIAL_MS)),
        }
    }

    /// Observe unexpected child exits. Always `None` for remote transports.
    pub fn exit_events(&self) -> watch::Receiver<Option<ChildExit>> {
        self.exit_tx.subscribe()
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.state
            .try_lock()
            .ok()
            .and_then(|state| state.as_ref().and_then(|active| active.child_pid))
    }

    /// Establish the connection. Idempotent: an existing connection is
    /// kept.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }
        self.stopping.store(false, Ordering::SeqCst);

        let active = match &self.descriptor {
            ClientDescriptor::Stdio { command, args, env } => {
                self.spawn_stdio(command, args, env).await?
            }
            ClientDescriptor::Remote { kind, url } => {
                tracing::debug!(server = %self.server_name, transport = %kind, url = %url,
                    "connecting remote MCP server");
                self.connect_remote(url).await?
            }
        };
        *state = Some(active);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Tear the connection down. Idempotent. For stdio this is the
    /// graceful stop: cancel the protocol service (closing stdin), give
    /// the child [`STOP_GRACE`] to exit, then kill it.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(active) = self.state.lock().await.take() else {
            return Ok(());
        };
        self.stopping.store(true, Ordering::SeqCst);

        let _ = active.service.cancel().await;

        if let Some(child) = active.child {
            if let Some(pid) = active.child_pid {
                send_sigterm(pid);
            }
            let deadline = tokio::time::Instant::now() + STOP_GRACE;
            loop {
                {
                    let mut guard = child.lock().await;
                    match guard.try_wait() {
                        Ok(Some(_)) => break,
                        Ok(None) => {}
                        Err(error) => {
                            tracing::debug!(server = %self.server_name, error = %error,
                                "failed to poll child during stop");
                            break;
                        }
                    }
                    if tokio::time::Instant::now() >= deadline {
                        if let Err(error) = guard.kill().await {
                            tracing::warn!(server = %self.server_name, error = %error,
                                "failed to kill child after grace period");
                        }
                        break;
                    }
                }
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            }
        }
        Ok(())
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.call(None, |peer| async move {
            peer.list_tools(None).await.map(|response| response.tools)
        })
        .await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult> {
        let mut request = CallToolRequestParam::new(name.to_string());
        request.arguments = arguments.and_then(|value| value.as_object().cloned());
        self.call(timeout, move |peer| {
            let request = request.clone();
            async move { peer.call_tool(request).await }
        })
        .await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.call(None, |peer| async move {
            peer.list_resources(None)
                .await
                .map(|response| response.resources)
        })
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let request = ReadResourceRequestParam::new(uri.to_string());
        self.call(None, move |peer| {
            let request = request.clone();
            async move { peer.read_resource(request).await }
        })
        .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.call(None, |peer| async move {
            peer.list_prompts(None).await.map(|response| response.prompts)
        })
        .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<GetPromptResult> {
        let mut request = GetPromptRequestParam::new(name.to_string());
        request.arguments = arguments.and_then(|value| value.as_object().cloned());
        self.call(None, move |peer| {
            let request = request.clone();
            async move { peer.get_prompt(request).await }
        })
        .await
    }

    /// Run one RPC under the transport's concurrency gate and the
    /// per-invocation deadline. A deadline hit drops the in-flight RPC;
    /// the connection itself survives and is not retried. A transport
    /// failure on a remote server reconnects in place with exponential
    /// backoff and retries, up to [`RESTART_MAX_ATTEMPTS`].
    async fn call<F, Fut, T>(&self, timeout: Option<Duration>, operation: F) -> Result<T>
    where
        F: Fn(Peer<RoleClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, rmcp::ServiceError>>,
    {
        let _permit = match &self.gate {
            CallGate::Serial(lock) => GatePermit::Serial(lock.lock().await),
            CallGate::Concurrent(semaphore) => GatePermit::Concurrent(
                semaphore
                    .acquire()
                    .await
                    .map_err(|_| RouterError::transport("client concurrency gate closed"))?,
            ),
        };

        let budget = timeout.unwrap_or(self.default_timeout);
        let mut last_error: Option<RouterError> = None;

        for attempt in 0..RESTART_MAX_ATTEMPTS {
            if attempt > 0 && !self.reconnect_after_failure().await {
                break;
            }

            // Clone the peer handle so the state lock is not held across
            // the RPC round-trip.
            let peer = {
                let state = self.state.lock().await;
                match state.as_ref() {
                    Some(active) => active.service.peer().clone(),
                    None => {
                        last_error = Some(RouterError::transport(format!(
                            "server '{}' is not connected",
                            self.server_name
                        )));
                        continue;
                    }
                }
            };

            match tokio::time::timeout(budget, operation(peer)).await {
                Ok(Ok(value)) => {
                    *self
                        .restart_backoff
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) =
                        Duration::from_millis(RESTART_BACKOFF_INITIAL_MS);
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    tracing::warn!(
                        server = %self.server_name,
                        attempt,
                        error = %error,
                        "MCP call failed"
                    );
                    last_error = Some(RouterError::transport(format!(
                        "MCP call on '{}' failed: {error}",
                        self.server_name
                    )));
                }
                Err(_) => {
                    return Err(RouterError::timeout(format!(
                        "MCP call on '{}' exceeded {}s",
                        self.server_name,
                        budget.as_secs()
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RouterError::transport(format!(
                "MCP call on '{}' failed without explicit error",
                self.server_name
            ))
        }))
    }

    /// Tear down and re-establish a remote connection after a transport
    /// failure, sleeping the current backoff first. stdio children are
    /// not respawned here; the manager's exit watcher supervises them.
    async fn reconnect_after_failure(&self) -> bool {
        if matches!(self.descriptor, ClientDescriptor::Stdio { .. }) {
            return false;
        }

        let delay = {
            let mut backoff = self
                .restart_backoff
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let delay = *backoff;
            *backoff = (*backoff * 2).min(Duration::from_millis(RESTART_BACKOFF_MAX_MS));
            delay
        };
        tokio::time::sleep(delay).await;

        if let Some(active) = self.state.lock().await.take() {
            let _ = active.service.cancel().await;
        }
        match self.connect().await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(server = %self.server_name, error = %error, "reconnect failed");
                false
            }
        }
    }

    async fn spawn_stdio(
        &self,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Active> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        // Inherited environment with the configured overlay on top.
        for (key, value) in env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|error| {
            RouterError::transport(format!(
                "failed to spawn '{command}' for server '{}': {error}",
                self.server_name
            ))
        })?;
        let child_pid = child.id();

        let stdout = child.stdout.take().ok_or_else(|| {
            RouterError::transport(format!(
                "no stdout pipe for server '{}'",
                self.server_name
            ))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            RouterError::transport(format!("no stdin pipe for server '{}'", self.server_name))
        })?;

        // Tee stderr into the diagnostics ring.
        if let Some(stderr) = child.stderr.take() {
            let ring = self.stderr.clone();
            let server = self.server_name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, line = %line, "child stderr");
                    ring.push(line);
                }
            });
        }

        let service = ().serve((stdout, stdin)).await.map_err(|error| {
            RouterError::transport(format!(
                "MCP handshake with server '{}' failed: {error}",
                self.server_name
            ))
        })?;

        let child = Arc::new(Mutex::new(child));
        self.spawn_exit_monitor(Arc::clone(&child));

        Ok(Active {
            service,
            child: Some(child),
            child_pid,
        })
    }

    async fn connect_remote(&self, url: &str) -> Result<Active> {
        use rmcp::transport::StreamableHttpClientTransport;

        let transport = StreamableHttpClientTransport::from_uri(url);
        let service = ().serve(transport).await.map_err(|error| {
            RouterError::transport(format!(
                "failed to connect to MCP server '{}' at {url}: {error}",
                self.server_name
            ))
        })?;

        Ok(Active {
            service,
            child: None,
            child_pid: None,
        })
    }

    /// Poll the child for exit; publish unplanned exits on the watch
    /// channel so the manager can transition status.
    fn spawn_exit_monitor(&self, child: Arc<Mutex<tokio::process::Child>>) {
        let exit_tx = self.exit_tx.clone();
        let stopping = Arc::clone(&self.stopping);
        let server = self.server_name.clone();

        tokio::spawn(async move {
            loop {
                if stopping.load(Ordering::SeqCst) {
                    return;
                }
                let status = {
                    let mut guard = child.lock().await;
                    match guard.try_wait() {
                        Ok(status) => status,
                        Err(error) => {
                            tracing::debug!(server = %server, error = %error,
                                "child exit poll failed");
                            return;
                        }
                    }
                };
                if let Some(status) = status {
                    if !stopping.load(Ordering::SeqCst) {
                        let _ = exit_tx.send(Some(ChildExit {
                            code: status.code(),
                        }));
                    }
                    return;
                }
                tokio::time::sleep(EXIT_POLL_INTERVAL).await;
            }
        });
    }
}

enum GatePermit<'a> {
    #[allow(dead_code)]
    Serial(tokio::sync::MutexGuard<'a, ()>),
    #[allow(dead_code)]
    Concurrent(tokio::sync::SemaphorePermit<'a>),
}

fn send_sigterm(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: kill(2) with a valid pid has no memory-safety
        // preconditions; a stale pid only yields ESRCH.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
