//! Cached store for versioned prompt templates.
//!
//! `get_active` is on the hot path of every analysis job, so lookups go
//! through an in-process TTL cache keyed by the (environment, agent type,
//! task type) triple. Cache population collapses concurrent misses into a
//! single database query; writes invalidate only the affected triple, and
//! only after the database transaction has committed.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use thiserror::Error;

use crate::db::template_repo::{self, PromptTemplate, TemplateDraft};
use crate::db::{Database, DatabaseError};

/// Baseline instruction set used when no active template is available.
/// Out-of-band by design: it is never persisted as a template record.
const BASELINE_INSTRUCTIONS: &str = "\
You are an expert resume analyzer and career consultant with deep knowledge of:
- ATS (Applicant Tracking Systems) optimization
- Resume best practices across industries
- Skills assessment and gap analysis
- Professional writing and formatting

Your task is to analyze resumes and provide:
1. An overall quality score (0-100) based on content quality, formatting and
   structure, ATS compatibility, skills presentation, and impact statements.
2. An optimized version that improves clarity and impact, enhances ATS
   compatibility, strengthens achievement statements, and maintains the
   candidate's authentic voice.
3. Specific, actionable improvement suggestions categorized by Skills,
   Experience, Format, Content, or Impact.
4. Extracted candidate information: name, contact details, skills, and
   work experience.

Return your analysis as valid JSON matching the response schema exactly.
Be constructive, specific, and actionable in your feedback.";

/// Returns the hard-coded fallback instruction set.
pub fn baseline_instructions() -> &'static str {
    BASELINE_INSTRUCTIONS
}

/// Errors from template store operations.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// A concurrent cache population failed; the error is shared between all
    /// waiters, so only its message survives.
    #[error("Template lookup failed: {0}")]
    Lookup(String),
}

/// Cache key: the (environment, agent type, task type) triple.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TemplateKey {
    pub environment: String,
    pub agent_type: String,
    pub task_type: String,
}

impl TemplateKey {
    pub fn new(
        environment: impl Into<String>,
        agent_type: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            environment: environment.into(),
            agent_type: agent_type.into(),
            task_type: task_type.into(),
        }
    }
}

/// TTL-bounded cache of active templates, including negative results
/// (`None` = no active version for the triple).
///
/// Owned by the store but constructed by the caller, so deployments choose
/// the TTL and tests can use very short ones.
pub struct TemplateCache {
    entries: Cache<TemplateKey, Option<Arc<PromptTemplate>>>,
}

impl TemplateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        }
    }

    /// Returns the cached entry for `key`, populating it with `load` on a
    /// miss. Concurrent misses for the same key run `load` exactly once;
    /// errors are shared with all waiters and not cached.
    fn get_or_try_populate<F>(
        &self,
        key: &TemplateKey,
        load: F,
    ) -> Result<Option<Arc<PromptTemplate>>, Arc<DatabaseError>>
    where
        F: FnOnce() -> Result<Option<Arc<PromptTemplate>>, DatabaseError>,
    {
        self.entries.try_get_with(key.clone(), load)
    }

    fn invalidate(&self, key: &TemplateKey) {
        self.entries.invalidate(key);
    }
}

/// Template store: versioned create/activate plus cached active lookup.
pub struct TemplateStore {
    db: Database,
    cache: TemplateCache,
}

impl TemplateStore {
    pub fn new(db: Database, cache: TemplateCache) -> Self {
        Self { db, cache }
    }

    /// Returns the active template for the triple, from cache when fresh.
    pub fn get_active(&self, key: &TemplateKey) -> Result<Option<Arc<PromptTemplate>>, TemplateError> {
        self.cache
            .get_or_try_populate(key, || {
                log::debug!(
                    "Template cache miss for {}/{}/{}",
                    key.environment,
                    key.agent_type,
                    key.task_type
                );
                template_repo::find_active(&self.db, &key.environment, &key.agent_type, &key.task_type)
                    .map(|found| found.map(Arc::new))
            })
            .map_err(|e| TemplateError::Lookup(e.to_string()))
    }

    /// Inserts a new (inactive) version for the draft's triple and
    /// invalidates that triple's cache entry.
    pub fn create(&self, draft: &TemplateDraft) -> Result<PromptTemplate, TemplateError> {
        let template = template_repo::insert_version(&self.db, draft)?;
        self.cache.invalidate(&TemplateKey::new(
            draft.environment.clone(),
            draft.agent_type.clone(),
            draft.task_type.clone(),
        ));
        Ok(template)
    }

    /// Activates a version for the triple. Returns `false` (no state change,
    /// cache untouched) when the version does not exist. The cache entry is
    /// invalidated only after the transaction has committed, so a concurrent
    /// reader cannot repopulate it with pre-commit data.
    pub fn activate_version(&self, key: &TemplateKey, version: i64) -> Result<bool, TemplateError> {
        let changed = template_repo::activate_version(
            &self.db,
            &key.environment,
            &key.agent_type,
            &key.task_type,
            version,
        )?;

        if changed {
            self.cache.invalidate(key);
            log::info!(
                "Activated template v{} for {}/{}/{}",
                version,
                key.environment,
                key.agent_type,
                key.task_type
            );
        }

        Ok(changed)
    }
}
