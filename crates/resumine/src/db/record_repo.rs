//! Analysis record repository — CRUD and status transitions for the
//! `analysis_records`, `suggestions`, and `candidate_info` tables.
//!
//! Status transitions are guarded in SQL so that a record never regresses
//! from `analyzed` and a retry reset only applies to a `processing` row.

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{now_rfc3339, Database, DatabaseError};

/// Lifecycle status of an analysis record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    Pending,
    Processing,
    Analyzed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Analyzed => "analyzed",
            AnalysisStatus::Failed => "failed",
        }
    }

    fn parse(s: &str, record_id: &str) -> Self {
        match s {
            "pending" => AnalysisStatus::Pending,
            "processing" => AnalysisStatus::Processing,
            "analyzed" => AnalysisStatus::Analyzed,
            "failed" => AnalysisStatus::Failed,
            other => {
                log::warn!(
                    "Unknown record status '{}' for record {}, defaulting to pending",
                    other,
                    record_id
                );
                AnalysisStatus::Pending
            }
        }
    }
}

/// A raw analysis record row from the database.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub id: String,
    pub owner_id: String,
    pub document_ref: String,
    pub filename: Option<String>,
    pub raw_content: Option<String>,
    pub optimized_content: Option<String>,
    pub score: Option<f64>,
    pub status: AnalysisStatus,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub analyzed_at: Option<String>,
    pub analysis_metadata: Option<String>,
}

impl AnalysisRecord {
    /// Creates a fresh `pending` record for a submitted document.
    pub fn new(owner_id: &str, document_ref: &str, filename: Option<&str>) -> Self {
        let now = now_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            document_ref: document_ref.to_string(),
            filename: filename.map(ToString::to_string),
            raw_content: None,
            optimized_content: None,
            score: None,
            status: AnalysisStatus::Pending,
            error: None,
            created_at: now.clone(),
            updated_at: now,
            analyzed_at: None,
            analysis_metadata: None,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let id: String = row.get("id")?;
        let status: String = row.get("status")?;
        Ok(Self {
            status: AnalysisStatus::parse(&status, &id),
            id,
            owner_id: row.get("owner_id")?,
            document_ref: row.get("document_ref")?,
            filename: row.get("filename")?,
            raw_content: row.get("raw_content")?,
            optimized_content: row.get("optimized_content")?,
            score: row.get("score")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            analyzed_at: row.get("analyzed_at")?,
            analysis_metadata: row.get("analysis_metadata")?,
        })
    }
}

/// A single improvement suggestion attached to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub category: String,
    pub description: String,
    pub priority: i64,
}

/// Structured candidate attributes extracted from the document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub skills: Vec<String>,
    pub experience: Vec<String>,
}

/// The full result of one successful analysis run, merged into the record
/// in a single transaction by [`apply_analysis`].
#[derive(Debug, Clone)]
pub struct AnalysisUpdate {
    pub raw_content: String,
    pub optimized_content: String,
    pub score: f64,
    pub suggestions: Vec<Suggestion>,
    pub candidate: CandidateInfo,
    /// Serialized metadata map from the inference service.
    pub metadata: Option<String>,
}

/// Inserts a new record row.
pub fn insert(db: &Database, record: &AnalysisRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO analysis_records (id, owner_id, document_ref, filename, raw_content,
             optimized_content, score, status, error, created_at, updated_at, analyzed_at,
             analysis_metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                record.id,
                record.owner_id,
                record.document_ref,
                record.filename,
                record.raw_content,
                record.optimized_content,
                record.score,
                record.status.as_str(),
                record.error,
                record.created_at,
                record.updated_at,
                record.analyzed_at,
                record.analysis_metadata,
            ],
        )?;
        Ok(())
    })
}

/// Finds a record by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<AnalysisRecord>, DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT * FROM analysis_records WHERE id = ?1",
            params![id],
            AnalysisRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Sqlite)
    })
}

/// Finds a record by ID, scoped to its owner. An owner mismatch is
/// indistinguishable from a missing record.
pub fn find_for_owner(
    db: &Database,
    id: &str,
    owner_id: &str,
) -> Result<Option<AnalysisRecord>, DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT * FROM analysis_records WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
            AnalysisRecord::from_row,
        )
        .optional()
        .map_err(DatabaseError::Sqlite)
    })
}

/// Returns the suggestions for a record in stable order.
pub fn suggestions_for(db: &Database, record_id: &str) -> Result<Vec<Suggestion>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT category, description, priority FROM suggestions
             WHERE record_id = ?1 ORDER BY position",
        )?;
        let rows = stmt
            .query_map(params![record_id], |row| {
                Ok(Suggestion {
                    category: row.get(0)?,
                    description: row.get(1)?,
                    priority: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the candidate info for a record, if extracted.
pub fn candidate_for(db: &Database, record_id: &str) -> Result<Option<CandidateInfo>, DatabaseError> {
    db.with_conn(|conn| candidate_for_conn(conn, record_id))
}

fn candidate_for_conn(
    conn: &Connection,
    record_id: &str,
) -> Result<Option<CandidateInfo>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT name, email, phone, skills, experience FROM candidate_info
             WHERE record_id = ?1",
            params![record_id],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((name, email, phone, skills_json, experience_json)) => Ok(Some(CandidateInfo {
            name,
            email,
            phone,
            skills: parse_string_array(&skills_json, "skills", record_id)?,
            experience: parse_string_array(&experience_json, "experience", record_id)?,
        })),
    }
}

fn parse_string_array(
    json: &str,
    column: &'static str,
    record_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::CorruptColumn {
        column,
        row: record_id.to_string(),
        reason: e.to_string(),
    })
}

/// Marks a record `processing`. Returns `false` when the record is missing
/// or already `analyzed`/`failed`; callers treat that as "nothing to do".
pub fn mark_processing(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_records SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, now_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}

/// Resets a `processing` record back to `pending` so it is visibly
/// retry-eligible. No-op for any other status.
pub fn reset_to_pending(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_records SET status = 'pending', updated_at = ?2
             WHERE id = ?1 AND status = 'processing'",
            params![id, now_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a record `failed` with a reason. Never downgrades an `analyzed`
/// record.
pub fn mark_failed(db: &Database, id: &str, reason: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE analysis_records SET status = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status != 'analyzed'",
            params![id, reason, now_rfc3339()],
        )?;
        Ok(changed > 0)
    })
}

/// Merges a successful analysis into the record in one transaction:
/// the suggestion set is replaced wholesale, candidate info is upserted,
/// and the record moves to `analyzed` with a clamped score.
pub fn apply_analysis(
    db: &Database,
    record_id: &str,
    update: &AnalysisUpdate,
) -> Result<(), DatabaseError> {
    db.with_tx(|tx| {
        let now = now_rfc3339();

        tx.execute(
            "UPDATE analysis_records SET raw_content = ?2, optimized_content = ?3, score = ?4,
             status = 'analyzed', error = NULL, updated_at = ?5, analyzed_at = ?5,
             analysis_metadata = ?6
             WHERE id = ?1",
            params![
                record_id,
                update.raw_content,
                update.optimized_content,
                update.score.clamp(0.0, 100.0),
                now,
                update.metadata,
            ],
        )?;

        tx.execute(
            "DELETE FROM suggestions WHERE record_id = ?1",
            params![record_id],
        )?;
        for (position, suggestion) in update.suggestions.iter().enumerate() {
            tx.execute(
                "INSERT INTO suggestions (record_id, category, description, priority, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record_id,
                    suggestion.category,
                    suggestion.description,
                    suggestion.priority.clamp(1, 5),
                    position as i64,
                ],
            )?;
        }

        let skills = serde_json::to_string(&update.candidate.skills).unwrap_or_else(|_| "[]".into());
        let experience =
            serde_json::to_string(&update.candidate.experience).unwrap_or_else(|_| "[]".into());
        tx.execute(
            "INSERT INTO candidate_info (record_id, name, email, phone, skills, experience, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(record_id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 phone = excluded.phone,
                 skills = excluded.skills,
                 experience = excluded.experience,
                 updated_at = excluded.updated_at",
            params![
                record_id,
                update.candidate.name,
                update.candidate.email,
                update.candidate.phone,
                skills,
                experience,
                now,
            ],
        )?;

        Ok(())
    })
}
