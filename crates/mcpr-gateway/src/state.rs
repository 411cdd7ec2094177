//! Composition root. The service graph is hand-wired here: leaves
//! (store, keychain) first, then the services that depend on them.
//! Components receive references from this owner struct and never reach
//! for globals; tests construct the same graph with in-memory leaves.

use mcpr_catalog::ToolCatalog;
use mcpr_config::{RouterConfig, ServerEntry, ServerTransport};
use mcpr_core::{Result, TransportKind};
use mcpr_hooks::HookRegistry;
use mcpr_keychain::SecretStore;
use mcpr_policy::{PolicyEngine, PolicyService};
use mcpr_ratelimit::RateLimiter;
use mcpr_server::{ManagerConfig, NewServer, ServerManager};
use mcpr_store::Store;
use mcpr_token::{TokenService, TokenValidator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::events::EventBus;

const APPROVAL_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(3_600);

pub struct Gateway {
    pub config: RouterConfig,
    pub store: Store,
    pub events: Arc<EventBus>,
    pub tokens: TokenService,
    pub validator: TokenValidator,
    pub policies: PolicyService,
    pub policy_engine: PolicyEngine,
    pub limiter: RateLimiter,
    pub approvals: Arc<mcpr_approval::ApprovalQueue>,
    pub manager: Arc<ServerManager>,
    pub catalog: Arc<ToolCatalog>,
    pub hooks: Arc<HookRegistry>,
}

impl Gateway {
    pub fn new(
        config: RouterConfig,
        store: Store,
        secrets: Arc<dyn SecretStore>,
    ) -> Result<Arc<Self>> {
        let events = Arc::new(EventBus::new());

        let tokens = TokenService::new(store.tokens(), secrets, store.audit());
        let validator = TokenValidator::new(tokens.clone());
        let policies = PolicyService::new(store.policies());
        let policy_engine = PolicyEngine::new(store.policies());
        let limiter = RateLimiter::default();
        let approvals = Arc::new(mcpr_approval::ApprovalQueue::new(events.clone()));

        let manager = ServerManager::new(
            store.servers(),
            store.audit(),
            events.clone(),
            ManagerConfig::default(),
        );
        manager.load_from_store()?;

        let catalog = Arc::new(ToolCatalog::new(manager.clone()));
        let hooks = Arc::new(HookRegistry::new());

        Ok(Arc::new(Self {
            config,
            store,
            events,
            tokens,
            validator,
            policies,
            policy_engine,
            limiter,
            approvals,
            manager,
            catalog,
            hooks,
        }))
    }

    /// Upsert the `[[servers]]` entries from the config file into the
    /// store, keyed by name. API-added servers are untouched.
    pub fn seed_configured_servers(&self) -> Result<usize> {
        let mut seeded = 0;
        for entry in &self.config.servers {
            if self.manager.get_by_name(&entry.name)?.is_some() {
                continue;
            }
            self.manager.add(entry_to_new_server(entry))?;
            seeded += 1;
        }
        Ok(seeded)
    }

    /// First run only: when no tokens exist at all, issue an admin token
    /// so the HTTP surface is reachable. The caller prints it once; it is
    /// never logged.
    pub async fn ensure_bootstrap_token(&self) -> Result<Option<mcpr_core::TokenRecord>> {
        if !self.tokens.list(None)?.is_empty() {
            return Ok(None);
        }
        let token = self
            .tokens
            .generate(mcpr_token::GenerateOptions {
                client_id: "admin".to_string(),
                name: "bootstrap admin".to_string(),
                ttl_secs: None,
                scopes: vec![],
                server_access: HashMap::new(),
                metadata: None,
            })
            .await?;
        Ok(Some(token))
    }

    /// Periodic work: approval expiry sweep and expired-token cleanup.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let approvals = Arc::clone(&self.approvals);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(APPROVAL_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let expired = approvals.sweep_expired();
                if !expired.is_empty() {
                    tracing::info!(count = expired.len(), "expired pending approvals");
                }
            }
        });

        let tokens = self.tokens.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TOKEN_CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                match tokens.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "removed expired tokens"),
                    Err(error) => tracing::warn!(error = %error, "token cleanup failed"),
                }
            }
        });
    }

    /// Ordered shutdown, reverse of construction: servers first, then
    /// pending approvals.
    pub async fn shutdown(&self) {
        self.manager.stop_all().await;
        for pending in self.approvals.list() {
            let _ = self.approvals.cancel(&pending.id);
        }
        tracing::info!("gateway shut down");
    }
}

fn entry_to_new_server(entry: &ServerEntry) -> NewServer {
    let (transport, command, args, env, url) = match &entry.transport {
        ServerTransport::Stdio { command, args, env } => (
            TransportKind::Stdio,
            Some(command.clone()),
            args.clone(),
            env.clone(),
            None,
        ),
        ServerTransport::Http { url } => (
            TransportKind::Http,
            None,
            Vec::new(),
            HashMap::new(),
            Some(url.clone()),
        ),
        ServerTransport::Sse { url } => (
            TransportKind::Sse,
            None,
            Vec::new(),
            HashMap::new(),
            Some(url.clone()),
        ),
    };
    NewServer {
        name: entry.name.clone(),
        transport,
        command,
        args,
        env,
        url,
        project_id: entry.project_id.clone(),
        tool_permissions: HashMap::new(),
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use mcpr_keychain::MemorySecretStore;

    /// A full gateway over in-memory leaves.
    pub fn make_gateway() -> Arc<Gateway> {
        let store = Store::open_in_memory().unwrap();
        Gateway::new(
            RouterConfig::default(),
            store,
            Arc::new(MemorySecretStore::new()),
        )
        .unwrap()
    }
}
