//! Repository for the `projects` table. Projects group servers; servers
//! reference them by id only.

use mcpr_core::{Result, RouterError};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::Store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
    pub created_at: i64,
}

#[derive(Clone)]
pub struct ProjectRepo {
    store: Store,
}

impl ProjectRepo {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn insert(&self, project: &ProjectRecord) -> Result<()> {
        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO projects (id, name, workspace_root, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id,
                project.name,
                project.workspace_root,
                project.created_at
            ],
        )
        .map_err(RouterError::internal)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<ProjectRecord>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM projects WHERE id = ?1")
            .map_err(RouterError::internal)?;
        let mut rows = stmt
            .query_map([id], row_to_project)
            .map_err(RouterError::internal)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(RouterError::internal)?)),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<ProjectRecord>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM projects ORDER BY created_at")
            .map_err(RouterError::internal)?;
        let rows = stmt
            .query_map([], row_to_project)
            .map_err(RouterError::internal)?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.map_err(RouterError::internal)?);
        }
        Ok(projects)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.store.lock();
        let changed = conn
            .execute("DELETE FROM projects WHERE id = ?1", [id])
            .map_err(RouterError::internal)?;
        if changed == 0 {
            return Err(RouterError::not_found("project", id));
        }
        Ok(())
    }
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        workspace_root: row.get("workspace_root")?,
        created_at: row.get("created_at")?,
    })
}
