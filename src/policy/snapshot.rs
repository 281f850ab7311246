use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::Result;

/// One collaborator grant, as the policy engine sees it.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CollaboratorEntry {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub role: String,
}

/// Project visibility facts pushed alongside the grants.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProjectEntry {
    pub id: Uuid,
    pub public: bool,
    pub name: String,
}

/// The full authorization-relevant dataset. Every push is a total
/// overwrite of the engine's copy, so a snapshot is only ever as stale as
/// the sync interval.
#[derive(Debug, Clone, Default)]
pub struct PolicySnapshot {
    pub collaborators: Vec<CollaboratorEntry>,
    pub projects: Vec<ProjectEntry>,
}

impl PolicySnapshot {
    /// Recompute the snapshot from the store. Two independent queries on
    /// one pooled connection acquisition each; there is no transactional
    /// tie between them because the engine tolerates a momentarily
    /// mismatched pair (the next cycle overwrites both).
    pub async fn compute(pool: &PgPool) -> Result<Self> {
        let collaborators: Vec<CollaboratorEntry> =
            sqlx::query_as("SELECT user_id, project_id, role FROM collaborators")
                .fetch_all(pool)
                .await?;

        let projects: Vec<ProjectEntry> =
            sqlx::query_as("SELECT id, public, name FROM projects")
                .fetch_all(pool)
                .await?;

        Ok(Self {
            collaborators,
            projects,
        })
    }

    /// Document PUT to the collaborators endpoint: the list under its own
    /// top-level key, full-replace semantics.
    pub fn collaborators_document(&self) -> Value {
        json!({ "collaborators": self.collaborators })
    }

    /// Document PUT to the projects endpoint.
    pub fn projects_document(&self) -> Value {
        json!({ "projects": self.projects })
    }
}
