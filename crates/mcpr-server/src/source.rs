//! The server manager is the catalog's tool source.

use async_trait::async_trait;
use mcpr_catalog::{SourceServer, SourceTool, ToolSource};
use mcpr_core::{Result, ServerStatus};
use serde_json::Value;

use crate::manager::ServerManager;

#[async_trait]
impl ToolSource for ServerManager {
    async fn running_servers(&self) -> Result<Vec<SourceServer>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| record.status == ServerStatus::Running)
            .map(|record| SourceServer {
                server_id: record.id,
                server_name: record.name,
                tool_permissions: record.tool_permissions,
            })
            .collect())
    }

    async fn list_tools(&self, server_id: &str) -> Result<Vec<SourceTool>> {
        let tools = self.get_tools(server_id).await?;
        Ok(tools.into_iter().map(convert_tool).collect())
    }
}

fn convert_tool(tool: rmcp::model::Tool) -> SourceTool {
    SourceTool {
        name: tool.name.to_string(),
        description: tool
            .description
            .as_deref()
            .unwrap_or_default()
            .to_string(),
        input_schema: Value::Object(tool.input_schema.as_ref().clone()),
    }
}
