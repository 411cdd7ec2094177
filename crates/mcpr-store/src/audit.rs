//! Append-only audit log with filtered and cursor-paginated queries.
//!
//! The cursor is the timestamp of the last returned row: descending pages
//! continue with `timestamp < cursor`, ascending with `timestamp > cursor`.
//! The repository fetches one extra row to decide whether more pages exist.

use mcpr_core::{generate_id, now_ms, AuditEvent, IdKind, Result, RouterError};
use rusqlite::{params_from_iter, Row, ToSql};
use serde::Serialize;

use crate::Store;

const DEFAULT_QUERY_LIMIT: usize = 100;
const DEFAULT_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub client_id: Option<String>,
    pub server_id: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDir {
    #[default]
    Desc,
    Asc,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub items: Vec<AuditEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

#[derive(Clone)]
pub struct AuditLog {
    store: Store,
}

impl AuditLog {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append one event, stamping id and timestamp when absent.
    pub fn append(&self, mut event: AuditEvent) -> Result<AuditEvent> {
        if event.id.is_empty() {
            event.id = generate_id(IdKind::Audit);
        }
        if event.timestamp == 0 {
            event.timestamp = now_ms();
        }

        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO audit_events (id, event_type, client_id, server_id, tool_name,
                                       success, duration_ms, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                event.id,
                event.event_type,
                event.client_id,
                event.server_id,
                event.tool_name,
                event.success,
                event.duration_ms,
                serde_json::to_string(&event.metadata).map_err(RouterError::internal)?,
                event.timestamp,
            ],
        )
        .map_err(RouterError::internal)?;
        Ok(event)
    }

    /// Filtered query, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>> {
        let (where_clause, params) = build_where(filter, None, OrderDir::Desc);
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
        let offset = filter.offset.unwrap_or(0);
        let sql = format!(
            "SELECT * FROM audit_events {where_clause}
             ORDER BY timestamp DESC LIMIT {limit} OFFSET {offset}"
        );

        self.run(&sql, &params)
    }

    /// Cursor-paginated query. Concatenating pages yields every matching
    /// row exactly once, in cursor order.
    pub fn query_paginated(
        &self,
        filter: &AuditFilter,
        cursor: Option<i64>,
        order: OrderDir,
        limit: Option<usize>,
    ) -> Result<AuditPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
        let (where_clause, params) = build_where(filter, cursor, order);
        let order_sql = match order {
            OrderDir::Desc => "DESC",
            OrderDir::Asc => "ASC",
        };
        let fetch = limit + 1;
        let sql = format!(
            "SELECT * FROM audit_events {where_clause}
             ORDER BY timestamp {order_sql} LIMIT {fetch}"
        );

        let mut items = self.run(&sql, &params)?;
        let has_more = items.len() > limit;
        items.truncate(limit);
        let next_cursor = has_more.then(|| items.last().map(|e| e.timestamp)).flatten();

        Ok(AuditPage {
            items,
            next_cursor,
            has_more,
        })
    }

    pub fn count(&self, filter: &AuditFilter) -> Result<usize> {
        let (where_clause, params) = build_where(filter, None, OrderDir::Desc);
        let sql = format!("SELECT COUNT(*) FROM audit_events {where_clause}");

        let conn = self.store.lock();
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params.iter().map(|value| value.as_ref())), |row| {
                row.get(0)
            })
            .map_err(RouterError::internal)?;
        Ok(count as usize)
    }

    /// Retention: drop rows strictly older than `cutoff_ms`.
    pub fn delete_older_than(&self, cutoff_ms: i64) -> Result<usize> {
        let conn = self.store.lock();
        let deleted = conn
            .execute("DELETE FROM audit_events WHERE timestamp < ?1", [cutoff_ms])
            .map_err(RouterError::internal)?;
        Ok(deleted)
    }

    fn run(&self, sql: &str, params: &[Box<dyn ToSql>]) -> Result<Vec<AuditEvent>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(sql).map_err(RouterError::internal)?;
        let rows = stmt
            .query_map(
                params_from_iter(params.iter().map(|value| value.as_ref())),
                row_to_event,
            )
            .map_err(RouterError::internal)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(RouterError::internal)??);
        }
        Ok(events)
    }
}

fn build_where(
    filter: &AuditFilter,
    cursor: Option<i64>,
    order: OrderDir,
) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    let mut push = |clause: &str, value: Box<dyn ToSql>| {
        params.push(value);
        clauses.push(format!("{clause} ?{}", params.len()));
    };

    if let Some(event_type) = &filter.event_type {
        push("event_type =", Box::new(event_type.clone()));
    }
    if let Some(client_id) = &filter.client_id {
        push("client_id =", Box::new(client_id.clone()));
    }
    if let Some(server_id) = &filter.server_id {
        push("server_id =", Box::new(server_id.clone()));
    }
    if let Some(start) = filter.start_time {
        push("timestamp >=", Box::new(start));
    }
    if let Some(end) = filter.end_time {
        push("timestamp <=", Box::new(end));
    }
    if let Some(cursor) = cursor {
        match order {
            OrderDir::Desc => push("timestamp <", Box::new(cursor)),
            OrderDir::Asc => push("timestamp >", Box::new(cursor)),
        }
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_clause, params)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Result<AuditEvent>> {
    let metadata: String = row.get("metadata")?;
    Ok(build_event(
        row.get("id")?,
        row.get("event_type")?,
        row.get("client_id")?,
        row.get("server_id")?,
        row.get("tool_name")?,
        row.get("success")?,
        row.get("duration_ms")?,
        metadata,
        row.get("timestamp")?,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_event(
    id: String,
    event_type: String,
    client_id: Option<String>,
    server_id: Option<String>,
    tool_name: Option<String>,
    success: bool,
    duration_ms: Option<i64>,
    metadata: String,
    timestamp: i64,
) -> Result<AuditEvent> {
    Ok(AuditEvent {
        id,
        event_type,
        client_id,
        server_id,
        tool_name,
        success,
        duration_ms,
        metadata: serde_json::from_str(&metadata).map_err(RouterError::internal)?,
        timestamp,
    })
}
