//! Authoritative in-memory view of configured servers, plus subprocess
//! and connection lifecycle.
//!
//! Records persist in SQLite; the in-memory map is a bounded LRU cache.
//! Running servers are pinned: eviction only ever removes `stopped`
//! entries, and is skipped entirely when nothing is evictable (the cap is
//! a soft target). Lifecycle transitions are serialized per server id,
//! and every mutation persists before the cache is updated. I/O happens
//! outside the cache lock.

use mcpr_core::{
    generate_id, now_ms, AuditEvent, EventSink, IdKind, Result, RouterError, ServerRecord,
    ServerStatus, UiEvent,
};
use mcpr_store::{AuditLog, ServerRepo};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

use crate::client::{
    ChildExit, ClientDescriptor, McpClient, RESTART_BACKOFF_INITIAL_MS, RESTART_BACKOFF_MAX_MS,
    RESTART_MAX_ATTEMPTS,
};

pub const MAX_SERVERS: usize = 100;
pub const MAX_RUNNING: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub max_servers: usize,
    pub max_running: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_servers: MAX_SERVERS,
            max_running: MAX_RUNNING,
        }
    }
}

/// Input for `add`; everything else is assigned by the manager.
#[derive(Debug, Clone)]
pub struct NewServer {
    pub name: String,
    pub transport: mcpr_core::TransportKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub url: Option<String>,
    pub project_id: Option<String>,
    pub tool_permissions: HashMap<String, bool>,
}

/// Patch for `update`. `id`, `created_at`, and `status` are not
/// patchable; absent fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ServerPatch {
    pub name: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    pub url: Option<String>,
    pub project_id: Option<Option<String>>,
    pub tool_permissions: Option<HashMap<String, bool>>,
}

struct Cache {
    entries: HashMap<String, ServerRecord>,
    /// LRU order; front is the eviction candidate.
    order: Vec<String>,
}

impl Cache {
    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|entry| entry == id) {
            let id = self.order.remove(pos);
            self.order.push(id);
        }
    }

    fn put(&mut self, record: ServerRecord, max_servers: usize) {
        let id = record.id.clone();
        if self.entries.insert(id.clone(), record).is_none() {
            self.order.push(id.clone());
        }
        self.touch(&id);

        if self.entries.len() > max_servers {
            // Oldest stopped entry goes; if everything is busy, skip.
            let victim = self
                .order
                .iter()
                .find(|candidate| {
                    **candidate != id
                        && self
                            .entries
                            .get(*candidate)
                            .is_some_and(|entry| entry.status == ServerStatus::Stopped)
                })
                .cloned();
            if let Some(victim) = victim {
                self.entries.remove(&victim);
                self.order.retain(|entry| *entry != victim);
            }
        }
    }

    fn remove(&mut self, id: &str) {
        self.entries.remove(id);
        self.order.retain(|entry| entry != id);
    }
}

/// Persists a status change, updates the cache, and notifies the UI bus.
/// Cloned into the exit-watcher tasks.
#[derive(Clone)]
struct StatusWriter {
    repo: ServerRepo,
    cache: Arc<StdMutex<Cache>>,
    events: Arc<dyn EventSink>,
}

impl StatusWriter {
    fn set(&self, id: &str, status: ServerStatus, last_error: Option<String>) -> Result<ServerRecord> {
        let mut record = match self.cached(id) {
            Some(record) => record,
            None => self
                .repo
                .get(id)?
                .ok_or_else(|| RouterError::not_found("server", id))?,
        };
        record.status = status;
        record.last_error = last_error;
        record.updated_at = now_ms();

        self.repo.update(&record)?;
        self.lock_cache().entries.insert(id.to_string(), record.clone());
        self.events.emit(UiEvent::ServerStatusChanged {
            server_id: id.to_string(),
            status,
        });
        Ok(record)
    }

    fn cached(&self, id: &str) -> Option<ServerRecord> {
        self.lock_cache().entries.get(id).cloned()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

pub struct ServerManager {
    repo: ServerRepo,
    audit: AuditLog,
    config: ManagerConfig,
    cache: Arc<StdMutex<Cache>>,
    runtimes: Arc<StdMutex<HashMap<String, Arc<McpClient>>>>,
    lifecycle_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    status: StatusWriter,
    /// Handle the exit watchers use to drive reconnects; never upgraded
    /// after the manager is dropped.
    weak_self: Weak<ServerManager>,
}

impl ServerManager {
    pub fn new(
        repo: ServerRepo,
        audit: AuditLog,
        events: Arc<dyn EventSink>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let cache = Arc::new(StdMutex::new(Cache {
            entries: HashMap::new(),
            order: Vec::new(),
        }));
        let status = StatusWriter {
            repo: repo.clone(),
            cache: Arc::clone(&cache),
            events,
        };
        Arc::new_cyclic(|weak| Self {
            repo,
            audit,
            config,
            cache,
            runtimes: Arc::new(StdMutex::new(HashMap::new())),
            lifecycle_locks: StdMutex::new(HashMap::new()),
            status,
            weak_self: weak.clone(),
        })
    }

    /// Startup: reset statuses left over from a previous process and warm
    /// the cache from the store.
    pub fn load_from_store(&self) -> Result<usize> {
        self.repo.reset_transient_statuses(now_ms())?;
        let records = self.repo.list()?;
        let count = records.len();
        let mut cache = self.lock_cache();
        for record in records.into_iter().take(self.config.max_servers) {
            cache.put(record, self.config.max_servers);
        }
        Ok(count)
    }

    pub fn add(&self, input: NewServer) -> Result<ServerRecord> {
        let now = now_ms();
        let record = ServerRecord {
            id: generate_id(IdKind::Server),
            name: input.name,
            transport: input.transport,
            command: input.command,
            args: input.args,
            env: input.env,
            url: input.url,
            project_id: input.project_id,
            status: ServerStatus::Stopped,
            tool_permissions: input.tool_permissions,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        record.validate()?;

        self.repo.insert(&record)?;
        self.lock_cache().put(record.clone(), self.config.max_servers);
        Ok(record)
    }

    pub fn update(&self, id: &str, patch: ServerPatch) -> Result<ServerRecord> {
        let mut record = self.get(id)?;

        if let Some(name) = patch.name {
            record.name = name;
        }
        if let Some(command) = patch.command {
            record.command = Some(command);
        }
        if let Some(args) = patch.args {
            record.args = args;
        }
        if let Some(env) = patch.env {
            record.env = env;
        }
        if let Some(url) = patch.url {
            record.url = Some(url);
        }
        if let Some(project_id) = patch.project_id {
            record.project_id = project_id;
        }
        if let Some(tool_permissions) = patch.tool_permissions {
            record.tool_permissions = tool_permissions;
        }
        record.updated_at = now_ms();
        record.validate()?;

        self.repo.update(&record)?;
        self.lock_cache().put(record.clone(), self.config.max_servers);
        Ok(record)
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;

        let record = self.get(id)?;
        if record.status == ServerStatus::Running || record.status == ServerStatus::Starting {
            self.stop_locked(id).await?;
        }
        self.repo.delete(id)?;
        self.lock_cache().remove(id);
        Ok(())
    }

    /// Cache-through read; a hit refreshes LRU recency, a miss re-reads
    /// the store and may evict the oldest stopped entry.
    pub fn get(&self, id: &str) -> Result<ServerRecord> {
        {
            let mut cache = self.lock_cache();
            if let Some(record) = cache.entries.get(id).cloned() {
                cache.touch(id);
                return Ok(record);
            }
        }
        let record = self
            .repo
            .get(id)?
            .ok_or_else(|| RouterError::not_found("server", id))?;
        self.lock_cache().put(record.clone(), self.config.max_servers);
        Ok(record)
    }

    pub fn list(&self) -> Result<Vec<ServerRecord>> {
        self.repo.list()
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<ServerRecord>> {
        self.repo.get_by_name(name)
    }

    pub fn running_count(&self) -> usize {
        self.lock_runtimes().len()
    }

    /// Ids currently held in the LRU cache, oldest first (diagnostics and
    /// tests).
    pub fn cached_ids(&self) -> Vec<String> {
        self.lock_cache().order.clone()
    }

    pub fn recent_stderr(&self, id: &str) -> Vec<String> {
        self.lock_runtimes()
            .get(id)
            .map(|client| client.stderr_lines())
            .unwrap_or_default()
    }

    pub async fn start(&self, id: &str) -> Result<ServerRecord> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    pub async fn stop(&self, id: &str) -> Result<ServerRecord> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await
    }

    /// `stop` then `start` under one lock acquisition, so the pair never
    /// interleaves with concurrent lifecycle calls for the same id.
    pub async fn restart(&self, id: &str) -> Result<ServerRecord> {
        let lock = self.lifecycle_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await?;
        self.start_locked(id).await
    }

    async fn start_locked(&self, id: &str) -> Result<ServerRecord> {
        let record = self.get(id)?;
        match record.status {
            ServerStatus::Running | ServerStatus::Starting => return Ok(record),
            ServerStatus::Stopping => {
                return Err(RouterError::conflict(format!(
                    "server '{}' is stopping",
                    record.name
                )));
            }
            ServerStatus::Stopped | ServerStatus::Error => {}
        }

        if self.running_count() >= self.config.max_running {
            return Err(RouterError::capacity(format!(
                "{} servers already running (max {})",
                self.running_count(),
                self.config.max_running
            )));
        }

        let descriptor = ClientDescriptor::from_record(&record)?;
        self.status.set(id, ServerStatus::Starting, None)?;

        let client = Arc::new(McpClient::new(record.name.clone(), descriptor));

        // Spawn/connect with short in-call retries, doubling the delay
        // between attempts.
        let mut backoff = Duration::from_millis(RESTART_BACKOFF_INITIAL_MS);
        let mut last_error = None;
        for attempt in 1..=RESTART_MAX_ATTEMPTS {
            match client.connect().await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(error) => {
                    tracing::warn!(
                        server = %record.name,
                        attempt,
                        error = %error,
                        "MCP connect failed, backing off"
                    );
                    last_error = Some(error);
                    if attempt < RESTART_MAX_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_millis(RESTART_BACKOFF_MAX_MS));
                    }
                }
            }
        }

        match last_error {
            None => {
                self.lock_runtimes().insert(id.to_string(), Arc::clone(&client));
                let started = self.status.set(id, ServerStatus::Running, None)?;
                self.spawn_exit_watcher(id.to_string(), Arc::clone(&client));
                self.audit_lifecycle("server.start", id, true, None);
                Ok(started)
            }
            Some(error) => {
                self.status
                    .set(id, ServerStatus::Error, Some(error.to_string()))?;
                self.audit_lifecycle("server.start", id, false, Some(error.to_string()));
                Err(error)
            }
        }
    }

    async fn stop_locked(&self, id: &str) -> Result<ServerRecord> {
        let record = self.get(id)?;
        if record.status == ServerStatus::Stopped || record.status == ServerStatus::Error {
            return Ok(record);
        }

        self.status.set(id, ServerStatus::Stopping, None)?;
        let client = self.lock_runtimes().remove(id);
        if let Some(client) = client {
            if let Err(error) = client.disconnect().await {
                tracing::warn!(server_id = %id, error = %error, "disconnect failed during stop");
            }
        }

        let stopped = self.status.set(id, ServerStatus::Stopped, None)?;
        self.audit_lifecycle("server.stop", id, true, None);
        Ok(stopped)
    }

    /// Tools of a running server, via its MCP client.
    pub async fn get_tools(&self, id: &str) -> Result<Vec<rmcp::model::Tool>> {
        self.require_running(id)?;
        self.client(id)?.list_tools().await
    }

    pub async fn call_tool(
        &self,
        id: &str,
        tool_name: &str,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<rmcp::model::CallToolResult> {
        let client = self.client(id)?;
        client.call_tool(tool_name, arguments, timeout).await
    }

    pub async fn list_resources(&self, id: &str) -> Result<Vec<rmcp::model::Resource>> {
        self.require_running(id)?;
        self.client(id)?.list_resources().await
    }

    pub async fn read_resource(
        &self,
        id: &str,
        uri: &str,
    ) -> Result<rmcp::model::ReadResourceResult> {
        self.require_running(id)?;
        self.client(id)?.read_resource(uri).await
    }

    pub async fn list_prompts(&self, id: &str) -> Result<Vec<rmcp::model::Prompt>> {
        self.require_running(id)?;
        self.client(id)?.list_prompts().await
    }

    pub async fn get_prompt(
        &self,
        id: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<rmcp::model::GetPromptResult> {
        self.require_running(id)?;
        self.client(id)?.get_prompt(name, arguments).await
    }

    fn require_running(&self, id: &str) -> Result<()> {
        let record = self.get(id)?;
        if record.status != ServerStatus::Running {
            return Err(RouterError::conflict(format!(
                "server '{}' is not running",
                record.name
            )));
        }
        Ok(())
    }

    pub fn client(&self, id: &str) -> Result<Arc<McpClient>> {
        self.lock_runtimes()
            .get(id)
            .cloned()
            .ok_or_else(|| RouterError::transport(format!("server '{id}' has no live connection")))
    }

    /// Stop everything that is running (shutdown path).
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.lock_runtimes().keys().cloned().collect();
        for id in ids {
            if let Err(error) = self.stop(&id).await {
                tracing::warn!(server_id = %id, error = %error, "failed to stop server at shutdown");
            }
        }
    }

    fn spawn_exit_watcher(&self, id: String, client: Arc<McpClient>) {
        let mut rx = client.exit_events();
        let weak = self.weak_self.clone();

        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                let exit = *rx.borrow();
                let Some(exit) = exit else { continue };
                let Some(manager) = weak.upgrade() else { return };
                manager.handle_unplanned_exit(&id, exit).await;
                return;
            }
        });
    }

    /// Record an exit the manager did not initiate, then reconnect on
    /// failure exits. Clean exits (code 0) are left stopped.
    async fn handle_unplanned_exit(&self, id: &str, exit: ChildExit) {
        self.lock_runtimes().remove(id);

        let (new_status, last_error) = describe_exit(exit);
        tracing::warn!(server_id = %id, code = ?exit.code, "server exited unexpectedly");
        if let Err(error) = self.status.set(id, new_status, last_error.clone()) {
            tracing::warn!(server_id = %id, error = %error,
                "failed to persist unexpected exit");
        }

        let event = AuditEvent {
            id: String::new(),
            event_type: "server.stop".to_string(),
            client_id: None,
            server_id: Some(id.to_string()),
            tool_name: None,
            success: exit.code == Some(0),
            duration_ms: None,
            metadata: serde_json::json!({"unexpected": true, "exitCode": exit.code}),
            timestamp: 0,
        };
        if let Err(error) = self.audit.append(event) {
            tracing::warn!(error = %error, "audit write failed");
        }

        if new_status == ServerStatus::Error {
            self.reconnect_with_backoff(id).await;
        }
    }

    /// Restart a crashed server, doubling the delay between attempts
    /// from [`RESTART_BACKOFF_INITIAL_MS`] up to
    /// [`RESTART_BACKOFF_MAX_MS`]. Stops as soon as someone else changes
    /// the server's state (manual stop, remove, or start).
    async fn reconnect_with_backoff(&self, id: &str) {
        let max = Duration::from_millis(RESTART_BACKOFF_MAX_MS);
        let mut backoff = Duration::from_millis(RESTART_BACKOFF_INITIAL_MS);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tokio::time::sleep(backoff).await;

            {
                let lock = self.lifecycle_lock(id);
                let _guard = lock.lock().await;
                match self.get(id) {
                    Ok(record) if record.status == ServerStatus::Error => {}
                    _ => return,
                }
                match self.start_locked(id).await {
                    Ok(_) => {
                        tracing::info!(server_id = %id, attempt, "server reconnected after failure");
                        return;
                    }
                    Err(error) => {
                        tracing::warn!(
                            server_id = %id,
                            attempt,
                            error = %error,
                            "reconnect attempt failed"
                        );
                    }
                }
            }

            if backoff >= max {
                break;
            }
            backoff = (backoff * 2).min(max);
        }

        tracing::warn!(server_id = %id, "reconnect gave up; server stays in error state");
    }

    fn audit_lifecycle(&self, event_type: &str, id: &str, success: bool, detail: Option<String>) {
        let event = AuditEvent {
            id: String::new(),
            event_type: event_type.to_string(),
            client_id: None,
            server_id: Some(id.to_string()),
            tool_name: None,
            success,
            duration_ms: None,
            metadata: detail.map_or(Value::Null, |d| serde_json::json!({"detail": d})),
            timestamp: 0,
        };
        if let Err(error) = self.audit.append(event) {
            tracing::warn!(error = %error, "audit write failed");
        }
    }

    fn lifecycle_lock(&self, id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .lifecycle_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Cache> {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_runtimes(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<McpClient>>> {
        self.runtimes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn describe_exit(exit: ChildExit) -> (ServerStatus, Option<String>) {
    match exit.code {
        Some(0) => (ServerStatus::Stopped, None),
        Some(code) => (
            ServerStatus::Error,
            Some(format!("Exited with code {code}")),
        ),
        None => (
            ServerStatus::Error,
            Some("Terminated by signal".to_string()),
        ),
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("config", &self.config)
            .field("running", &self.running_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
