//! Identifier-named migrations, applied in lexicographic order inside a
//! single transaction. Each applied migration is recorded with its
//! application time; reapplication is a no-op.

use mcpr_core::{now_ms, Result, RouterError};

use crate::Store;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_initial",
        r#"
CREATE TABLE IF NOT EXISTS servers (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL UNIQUE,
    transport        TEXT NOT NULL,
    command          TEXT,
    args             TEXT NOT NULL DEFAULT '[]',
    env              TEXT NOT NULL DEFAULT '{}',
    url              TEXT,
    project_id       TEXT,
    status           TEXT NOT NULL DEFAULT 'stopped',
    tool_permissions TEXT NOT NULL DEFAULT '{}',
    last_error       TEXT,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    id            TEXT PRIMARY KEY,
    client_id     TEXT NOT NULL,
    name          TEXT NOT NULL,
    issued_at     INTEGER NOT NULL,
    expires_at    INTEGER NOT NULL,
    last_used_at  INTEGER,
    scopes        TEXT NOT NULL DEFAULT '[]',
    server_access TEXT NOT NULL DEFAULT '{}',
    metadata      TEXT
);
CREATE INDEX IF NOT EXISTS idx_tokens_client ON tokens(client_id);
CREATE INDEX IF NOT EXISTS idx_tokens_expiry ON tokens(expires_at);

CREATE TABLE IF NOT EXISTS policies (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    enabled       INTEGER NOT NULL DEFAULT 1,
    scope         TEXT NOT NULL,
    scope_id      TEXT,
    resource_type TEXT NOT NULL,
    pattern       TEXT NOT NULL,
    action        TEXT NOT NULL,
    priority      INTEGER NOT NULL DEFAULT 0,
    conditions    TEXT NOT NULL DEFAULT '[]',
    redact_fields TEXT NOT NULL DEFAULT '[]',
    created_at    INTEGER NOT NULL,
    updated_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_policies_scope ON policies(scope, scope_id);

CREATE TABLE IF NOT EXISTS projects (
    id             TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    workspace_root TEXT,
    created_at     INTEGER NOT NULL
);
"#,
    ),
    (
        "0002_audit_events",
        r#"
CREATE TABLE IF NOT EXISTS audit_events (
    id          TEXT PRIMARY KEY,
    event_type  TEXT NOT NULL,
    client_id   TEXT,
    server_id   TEXT,
    tool_name   TEXT,
    success     INTEGER NOT NULL,
    duration_ms INTEGER,
    metadata    TEXT NOT NULL DEFAULT 'null',
    timestamp   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_type_client_ts
    ON audit_events(event_type, client_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_events(timestamp);
"#,
    ),
];

/// Apply every pending migration. Safe to call on every startup.
pub fn apply_all(store: &Store) -> Result<()> {
    let mut conn = store.lock();

    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            name       TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )
    .map_err(RouterError::internal)?;

    let mut ordered: Vec<&(&str, &str)> = MIGRATIONS.iter().collect();
    ordered.sort_by_key(|(name, _)| *name);

    let tx = conn.transaction().map_err(RouterError::internal)?;
    for (name, sql) in ordered {
        let already: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )
            .map_err(RouterError::internal)?;
        if already {
            continue;
        }

        tx.execute_batch(sql)
            .map_err(|e| RouterError::Internal(format!("migration '{name}' failed: {e}")))?;
        tx.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![name, now_ms()],
        )
        .map_err(RouterError::internal)?;
        tracing::info!(migration = %name, "applied migration");
    }
    tx.commit().map_err(RouterError::internal)?;

    Ok(())
}

/// Names of applied migrations, in application order.
pub fn applied_names(store: &Store) -> Result<Vec<String>> {
    let conn = store.lock();
    let mut stmt = conn
        .prepare("SELECT name FROM migrations ORDER BY name")
        .map_err(RouterError::internal)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(RouterError::internal)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(RouterError::internal)?;
    Ok(names)
}
