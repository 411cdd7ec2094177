//! The aggregated `server → tools` view.
//!
//! Tool definitions come from `list_tools` on every running server through
//! the [`ToolSource`] trait (implemented by the server manager; tests use
//! a fixture source). The cache holds for [`CATALOG_TTL`]; the first query
//! after expiry triggers a refresh, which also rebuilds the search index.

use async_trait::async_trait;
use mcpr_core::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::naming::{exposed_tool_name, parse_exposed_name, slug};
use crate::risk::RiskLevel;
use crate::search::{IndexEntry, SearchHit, SearchIndex, DEFAULT_SEARCH_LIMIT};

pub const CATALOG_TTL: Duration = Duration::from_secs(60);

/// A running server as the catalog sees it.
#[derive(Debug, Clone)]
pub struct SourceServer {
    pub server_id: String,
    pub server_name: String,
    /// Per-tool enable flags; missing tools default to enabled.
    pub tool_permissions: HashMap<String, bool>,
}

/// Raw tool as reported by a server.
#[derive(Debug, Clone)]
pub struct SourceTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Where the catalog pulls tools from.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Servers currently in the `running` state.
    async fn running_servers(&self) -> Result<Vec<SourceServer>>;

    /// `list_tools` on one running server.
    async fn list_tools(&self, server_id: &str) -> Result<Vec<SourceTool>>;
}

/// One tool in the aggregated view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogTool {
    pub server_id: String,
    /// Slug of the owning server's name, as used in the exposed name.
    pub server_slug: String,
    /// Raw name as the child server knows it.
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub exposed_name: String,
    pub enabled: bool,
    pub risk_level: RiskLevel,
    pub usage_count: u64,
}

#[derive(Default)]
struct CacheState {
    tools: Vec<CatalogTool>,
    /// (server slug, raw name) → index into `tools`.
    by_key: HashMap<(String, String), usize>,
    index: SearchIndex,
    refreshed_at: Option<Instant>,
}

pub struct ToolCatalog {
    source: Arc<dyn ToolSource>,
    cache: RwLock<CacheState>,
    /// Usage counters survive refreshes (but not restarts).
    usage: std::sync::Mutex<HashMap<String, u64>>,
    ttl: Duration,
}

impl ToolCatalog {
    pub fn new(source: Arc<dyn ToolSource>) -> Self {
        Self::with_ttl(source, CATALOG_TTL)
    }

    pub fn with_ttl(source: Arc<dyn ToolSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: RwLock::new(CacheState::default()),
            usage: std::sync::Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// All tools across running servers, refreshing when stale.
    pub async fn all_tools(&self) -> Result<Vec<CatalogTool>> {
        self.ensure_fresh().await?;
        Ok(self.cache.read().await.tools.clone())
    }

    pub async fn tools_for_server(&self, server_id: &str) -> Result<Vec<CatalogTool>> {
        self.ensure_fresh().await?;
        Ok(self
            .cache
            .read()
            .await
            .tools
            .iter()
            .filter(|tool| tool.server_id == server_id)
            .cloned()
            .collect())
    }

    /// Map an exposed name to its catalog entry. Unknown or malformed
    /// names are `None`; the caller decides the error surface.
    pub async fn resolve(&self, exposed: &str) -> Result<Option<CatalogTool>> {
        let Some((server_slug, raw_name)) = parse_exposed_name(exposed) else {
            return Ok(None);
        };
        self.ensure_fresh().await?;

        let cache = self.cache.read().await;
        Ok(cache
            .by_key
            .get(&(server_slug, raw_name))
            .map(|&i| cache.tools[i].clone()))
    }

    /// BM25 search across the aggregated view.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<(CatalogTool, f64)>> {
        self.ensure_fresh().await?;
        let cache = self.cache.read().await;

        let hits: Vec<SearchHit> = cache
            .index
            .search(query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT));
        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                cache
                    .tools
                    .iter()
                    .find(|tool| tool.exposed_name == hit.exposed_name)
                    .map(|tool| (tool.clone(), hit.score))
            })
            .collect())
    }

    /// Bump the usage counter after a successful call.
    pub fn record_usage(&self, exposed_name: &str) {
        let mut usage = self
            .usage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *usage.entry(exposed_name.to_string()).or_insert(0) += 1;
    }

    /// Drop the cache so the next query refreshes.
    pub async fn invalidate(&self) {
        self.cache.write().await.refreshed_at = None;
    }

    async fn ensure_fresh(&self) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if let Some(at) = cache.refreshed_at {
                if at.elapsed() < self.ttl {
                    return Ok(());
                }
            }
        }
        self.refresh().await
    }

    /// Rebuild the whole view from the source. Writers swap the state in
    /// one shot; readers never observe a partial refresh.
    pub async fn refresh(&self) -> Result<()> {
        let servers = self.source.running_servers().await?;

        let mut tools = Vec::new();
        for server in &servers {
            let listed = match self.source.list_tools(&server.server_id).await {
                Ok(listed) => listed,
                Err(error) => {
                    tracing::warn!(
                        server = %server.server_name,
                        error = %error,
                        "catalog refresh skipping server"
                    );
                    continue;
                }
            };
            let server_slug = slug(&server.server_name);
            for tool in listed {
                let exposed_name = exposed_tool_name(&server.server_name, &tool.name);
                let enabled = server
                    .tool_permissions
                    .get(&tool.name)
                    .copied()
                    .unwrap_or(true);
                tools.push(CatalogTool {
                    server_id: server.server_id.clone(),
                    server_slug: server_slug.clone(),
                    risk_level: RiskLevel::derive(&tool.name),
                    usage_count: self.usage_count(&exposed_name),
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    exposed_name,
                    enabled,
                });
            }
        }

        let by_key: HashMap<(String, String), usize> = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| ((tool.server_slug.clone(), tool.name.clone()), i))
            .collect();

        let entries: Vec<IndexEntry<'_>> = tools
            .iter()
            .map(|tool| IndexEntry {
                exposed_name: &tool.exposed_name,
                name: &tool.name,
                description: &tool.description,
                server_id: &tool.server_id,
            })
            .collect();
        let index = SearchIndex::build(&entries);

        let mut cache = self.cache.write().await;
        *cache = CacheState {
            tools,
            by_key,
            index,
            refreshed_at: Some(Instant::now()),
        };
        Ok(())
    }

    fn usage_count(&self, exposed_name: &str) -> u64 {
        self.usage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(exposed_name)
            .copied()
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for ToolCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCatalog")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
