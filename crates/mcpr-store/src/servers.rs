//! Repository for the `servers` table.

use mcpr_core::{Result, RouterError, ServerRecord, ServerStatus};
use rusqlite::{params, Row};

use crate::sql;
use crate::Store;

#[derive(Clone)]
pub struct ServerRepo {
    store: Store,
}

impl ServerRepo {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn insert(&self, server: &ServerRecord) -> Result<()> {
        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO servers (id, name, transport, command, args, env, url, project_id,
                                  status, tool_permissions, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                server.id,
                server.name,
                sql::transport_to_sql(server.transport),
                server.command,
                sql::to_json(&server.args)?,
                sql::to_json(&server.env)?,
                server.url,
                server.project_id,
                sql::status_to_sql(server.status),
                sql::to_json(&server.tool_permissions)?,
                server.last_error,
                server.created_at,
                server.updated_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RouterError::conflict(format!("server name '{}' already exists", server.name))
            }
            other => RouterError::internal(other),
        })?;
        Ok(())
    }

    pub fn update(&self, server: &ServerRecord) -> Result<()> {
        let conn = self.store.lock();
        let changed = conn
            .execute(
                "UPDATE servers SET name = ?2, transport = ?3, command = ?4, args = ?5,
                        env = ?6, url = ?7, project_id = ?8, status = ?9,
                        tool_permissions = ?10, last_error = ?11, updated_at = ?12
                 WHERE id = ?1",
                params![
                    server.id,
                    server.name,
                    sql::transport_to_sql(server.transport),
                    server.command,
                    sql::to_json(&server.args)?,
                    sql::to_json(&server.env)?,
                    server.url,
                    server.project_id,
                    sql::status_to_sql(server.status),
                    sql::to_json(&server.tool_permissions)?,
                    server.last_error,
                    server.updated_at,
                ],
            )
            .map_err(RouterError::internal)?;
        if changed == 0 {
            return Err(RouterError::not_found("server", &server.id));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ServerRecord>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM servers WHERE id = ?1")
            .map_err(RouterError::internal)?;
        let mut rows = stmt
            .query_map([id], row_to_server)
            .map_err(RouterError::internal)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RouterError::internal)??)),
            None => Ok(None),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<ServerRecord>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM servers WHERE name = ?1")
            .map_err(RouterError::internal)?;
        let mut rows = stmt
            .query_map([name], row_to_server)
            .map_err(RouterError::internal)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RouterError::internal)??)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<ServerRecord>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM servers ORDER BY created_at")
            .map_err(RouterError::internal)?;
        let rows = stmt
            .query_map([], row_to_server)
            .map_err(RouterError::internal)?;

        let mut servers = Vec::new();
        for row in rows {
            servers.push(row.map_err(RouterError::internal)??);
        }
        Ok(servers)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.store.lock();
        let changed = conn
            .execute("DELETE FROM servers WHERE id = ?1", [id])
            .map_err(RouterError::internal)?;
        if changed == 0 {
            return Err(RouterError::not_found("server", id));
        }
        Ok(())
    }

    /// Reset transient statuses left over from a previous process. Rows in
    /// `starting`/`running`/`stopping` go back to `stopped`.
    pub fn reset_transient_statuses(&self, now_ms: i64) -> Result<usize> {
        let conn = self.store.lock();
        let changed = conn
            .execute(
                "UPDATE servers SET status = 'stopped', updated_at = ?1
                 WHERE status IN ('starting', 'running', 'stopping')",
                [now_ms],
            )
            .map_err(RouterError::internal)?;
        Ok(changed)
    }
}

fn row_to_server(row: &Row<'_>) -> rusqlite::Result<Result<ServerRecord>> {
    let transport: String = row.get("transport")?;
    let status: String = row.get("status")?;
    let args: String = row.get("args")?;
    let env: String = row.get("env")?;
    let tool_permissions: String = row.get("tool_permissions")?;

    Ok(build_server(
        row.get("id")?,
        row.get("name")?,
        transport,
        row.get("command")?,
        args,
        env,
        row.get("url")?,
        row.get("project_id")?,
        status,
        tool_permissions,
        row.get("last_error")?,
        row.get("created_at")?,
        row.get("updated_at")?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_server(
    id: String,
    name: String,
    transport: String,
    command: Option<String>,
    args: String,
    env: String,
    url: Option<String>,
    project_id: Option<String>,
    status: String,
    tool_permissions: String,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
) -> Result<ServerRecord> {
    Ok(ServerRecord {
        id,
        name,
        transport: sql::transport_from_sql(&transport)?,
        command,
        args: sql::from_json(&args)?,
        env: sql::from_json(&env)?,
        url,
        project_id,
        status: sql::status_from_sql(&status)?,
        tool_permissions: sql::from_json(&tool_permissions)?,
        last_error,
        created_at,
        updated_at,
    })
}
