//! Repository for token metadata. Secrets never touch this table; the
//! keychain holds the full serialized token.

use mcpr_core::{Result, RouterError, TokenRecord};
use rusqlite::{params, Row};

use crate::sql;
use crate::Store;

#[derive(Clone)]
pub struct TokenRepo {
    store: Store,
}

impl TokenRepo {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn upsert(&self, token: &TokenRecord) -> Result<()> {
        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO tokens (id, client_id, name, issued_at, expires_at, last_used_at,
                                 scopes, server_access, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 client_id = excluded.client_id,
                 name = excluded.name,
                 issued_at = excluded.issued_at,
                 expires_at = excluded.expires_at,
                 last_used_at = excluded.last_used_at,
                 scopes = excluded.scopes,
                 server_access = excluded.server_access,
                 metadata = excluded.metadata",
            params![
                token.id,
                token.client_id,
                token.name,
                token.issued_at,
                token.expires_at,
                token.last_used_at,
                sql::to_json(&token.scopes)?,
                sql::to_json(&token.server_access)?,
                token
                    .metadata
                    .as_ref()
                    .map(sql::to_json)
                    .transpose()?,
            ],
        )
        .map_err(RouterError::internal)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<TokenRecord>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM tokens WHERE id = ?1")
            .map_err(RouterError::internal)?;
        let mut rows = stmt
            .query_map([id], row_to_token)
            .map_err(RouterError::internal)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RouterError::internal)??)),
            None => Ok(None),
        }
    }

    pub fn list(&self, client_id: Option<&str>) -> Result<Vec<TokenRecord>> {
        let conn = self.store.lock();
        let mut tokens = Vec::new();
        match client_id {
            Some(client) => {
                let mut stmt = conn
                    .prepare("SELECT * FROM tokens WHERE client_id = ?1 ORDER BY issued_at")
                    .map_err(RouterError::internal)?;
                let rows = stmt
                    .query_map([client], row_to_token)
                    .map_err(RouterError::internal)?;
                for row in rows {
                    tokens.push(row.map_err(RouterError::internal)??);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT * FROM tokens ORDER BY issued_at")
                    .map_err(RouterError::internal)?;
                let rows = stmt
                    .query_map([], row_to_token)
                    .map_err(RouterError::internal)?;
                for row in rows {
                    tokens.push(row.map_err(RouterError::internal)??);
                }
            }
        }
        Ok(tokens)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.store.lock();
        conn.execute("DELETE FROM tokens WHERE id = ?1", [id])
            .map_err(RouterError::internal)?;
        Ok(())
    }

    /// Delete metadata rows whose expiry is before `now_secs`; returns the
    /// deleted ids so the caller can clear the keychain too.
    pub fn delete_expired(&self, now_secs: i64) -> Result<Vec<String>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM tokens WHERE expires_at < ?1")
            .map_err(RouterError::internal)?;
        let ids = stmt
            .query_map([now_secs], |row| row.get::<_, String>(0))
            .map_err(RouterError::internal)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(RouterError::internal)?;

        conn.execute("DELETE FROM tokens WHERE expires_at < ?1", [now_secs])
            .map_err(RouterError::internal)?;
        Ok(ids)
    }
}

fn row_to_token(row: &Row<'_>) -> rusqlite::Result<Result<TokenRecord>> {
    let scopes: String = row.get("scopes")?;
    let server_access: String = row.get("server_access")?;
    let metadata: Option<String> = row.get("metadata")?;

    Ok(build_token(
        row.get("id")?,
        row.get("client_id")?,
        row.get("name")?,
        row.get("issued_at")?,
        row.get("expires_at")?,
        row.get("last_used_at")?,
        scopes,
        server_access,
        metadata,
    ))
}

#[allow(clippy::too_many_arguments)]
fn build_token(
    id: String,
    client_id: String,
    name: String,
    issued_at: i64,
    expires_at: i64,
    last_used_at: Option<i64>,
    scopes: String,
    server_access: String,
    metadata: Option<String>,
) -> Result<TokenRecord> {
    Ok(TokenRecord {
        id,
        client_id,
        name,
        issued_at,
        expires_at,
        last_used_at,
        scopes: sql::from_json(&scopes)?,
        server_access: sql::from_json(&server_access)?,
        metadata: metadata.as_deref().map(sql::from_json).transpose()?,
    })
}
