//! Prompt template repository — versioned instruction templates keyed by
//! (agent type, task type, environment).
//!
//! Invariant: at most one active version exists per triple. Activation is a
//! single transaction that deactivates all siblings and activates the target.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_rfc3339, Database, DatabaseError};

/// A stored prompt template version.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub id: i64,
    pub agent_type: String,
    pub task_type: String,
    pub environment: String,
    pub version: i64,
    pub active: bool,
    pub content: String,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl PromptTemplate {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            agent_type: row.get("agent_type")?,
            task_type: row.get("task_type")?,
            environment: row.get("environment")?,
            version: row.get("version")?,
            active: row.get::<_, i64>("active")? != 0,
            content: row.get("content")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Input for creating a new template version.
#[derive(Debug, Clone)]
pub struct TemplateDraft {
    pub agent_type: String,
    pub task_type: String,
    pub environment: String,
    pub content: String,
    pub created_by: Option<String>,
}

/// Inserts a new template version for the draft's triple. The version number
/// is allocated inside the transaction (highest existing + 1) and the new
/// version starts inactive.
pub fn insert_version(db: &Database, draft: &TemplateDraft) -> Result<PromptTemplate, DatabaseError> {
    db.with_tx(|tx| {
        let next_version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_templates
             WHERE agent_type = ?1 AND task_type = ?2 AND environment = ?3",
            params![draft.agent_type, draft.task_type, draft.environment],
            |r| r.get(0),
        )?;

        let now = now_rfc3339();
        tx.execute(
            "INSERT INTO prompt_templates (agent_type, task_type, environment, version, active,
             content, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7, ?7)",
            params![
                draft.agent_type,
                draft.task_type,
                draft.environment,
                next_version,
                draft.content,
                draft.created_by,
                now,
            ],
        )?;

        Ok(PromptTemplate {
            id: tx.last_insert_rowid(),
            agent_type: draft.agent_type.clone(),
            task_type: draft.task_type.clone(),
            environment: draft.environment.clone(),
            version: next_version,
            active: false,
            content: draft.content.clone(),
            created_by: draft.created_by.clone(),
            created_at: now.clone(),
            updated_at: now,
        })
    })
}

/// Finds the highest-version active template for a triple.
pub fn find_active(
    db: &Database,
    environment: &str,
    agent_type: &str,
    task_type: &str,
) -> Result<Option<PromptTemplate>, DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT * FROM prompt_templates
             WHERE environment = ?1 AND agent_type = ?2 AND task_type = ?3 AND active = 1
             ORDER BY version DESC LIMIT 1",
            params![environment, agent_type, task_type],
            PromptTemplate::from_row,
        )
        .optional()
        .map_err(DatabaseError::Sqlite)
    })
}

/// Activates a specific version for a triple, deactivating all siblings, in
/// one transaction. Returns `false` without any state change when the target
/// version does not exist.
pub fn activate_version(
    db: &Database,
    environment: &str,
    agent_type: &str,
    task_type: &str,
    version: i64,
) -> Result<bool, DatabaseError> {
    db.with_tx(|tx| {
        let target: Option<i64> = tx
            .query_row(
                "SELECT id FROM prompt_templates
                 WHERE environment = ?1 AND agent_type = ?2 AND task_type = ?3 AND version = ?4",
                params![environment, agent_type, task_type, version],
                |r| r.get(0),
            )
            .optional()?;

        let Some(target_id) = target else {
            return Ok(false);
        };

        let now = now_rfc3339();
        tx.execute(
            "UPDATE prompt_templates SET active = 0, updated_at = ?4
             WHERE environment = ?1 AND agent_type = ?2 AND task_type = ?3 AND active = 1",
            params![environment, agent_type, task_type, now],
        )?;
        tx.execute(
            "UPDATE prompt_templates SET active = 1, updated_at = ?2 WHERE id = ?1",
            params![target_id, now],
        )?;

        Ok(true)
    })
}
