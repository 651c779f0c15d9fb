//! The multi-stage analysis pipeline.
//!
//! One `process` call takes a record from `pending` to `analyzed`:
//! load → mark processing → fetch + extract → template (or baseline) →
//! inference → transactional merge. On any failure after the processing mark
//! the record is reset to `pending` so it is visibly retry-eligible while
//! the queue message stays undeleted.

use std::sync::Arc;

use tracing::{info_span, Instrument};

use crate::db::record_repo::{self, AnalysisRecord, AnalysisUpdate, CandidateInfo, Suggestion};
use crate::db::Database;
use crate::docstore::DocumentStore;
use crate::extract::ExtractorRegistry;
use crate::inference::{InferenceClient, InferenceRequest};
use crate::templates::{baseline_instructions, TemplateKey, TemplateStore};

use super::error::PipelineError;

/// Environment-level knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub environment: String,
    pub agent_type: String,
    pub task_type: String,
    /// Extracted text longer than this is truncated before inference.
    pub max_content_length: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            agent_type: "resume-analyzer".to_string(),
            task_type: "analysis".to_string(),
            max_content_length: 10_000,
        }
    }
}

/// Orchestrates one analysis job end to end. All collaborators are injected
/// through the constructor.
pub struct AnalysisPipeline {
    db: Database,
    documents: Arc<dyn DocumentStore>,
    extractor: ExtractorRegistry,
    templates: Arc<TemplateStore>,
    inference: Arc<dyn InferenceClient>,
    options: PipelineOptions,
}

impl AnalysisPipeline {
    pub fn new(
        db: Database,
        documents: Arc<dyn DocumentStore>,
        extractor: ExtractorRegistry,
        templates: Arc<TemplateStore>,
        inference: Arc<dyn InferenceClient>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            db,
            documents,
            extractor,
            templates,
            inference,
            options,
        }
    }

    /// Runs the full pipeline for one record.
    pub async fn process(&self, record_id: &str, owner_id: &str) -> Result<(), PipelineError> {
        let span = info_span!("analysis", record_id = %record_id);
        self.process_inner(record_id, owner_id).instrument(span).await
    }

    async fn process_inner(&self, record_id: &str, owner_id: &str) -> Result<(), PipelineError> {
        // Stage 1: load the record, scoped to its owner.
        let record = record_repo::find_for_owner(&self.db, record_id, owner_id)?.ok_or_else(|| {
            PipelineError::RecordNotFound {
                id: record_id.to_string(),
            }
        })?;

        // Stage 2: mark processing before the long-running work starts, so
        // external observers see progress. A record that already reached a
        // terminal status (redelivery after a crash between commit and queue
        // delete) is skipped.
        if !record_repo::mark_processing(&self.db, &record.id)? {
            log::info!(
                "Record {} already in terminal status, skipping analysis",
                record.id
            );
            return Ok(());
        }

        match self.run_stages(&record).await {
            Ok(()) => {
                log::info!("Record {} analyzed", record.id);
                Ok(())
            }
            Err(e) => {
                // The merge transaction (if reached) rolled back on drop.
                // Reset outside any transaction so the record is visibly
                // retry-eligible, then re-raise for the worker's
                // retry/poison handling.
                if let Err(reset_err) = record_repo::reset_to_pending(&self.db, &record.id) {
                    log::error!(
                        "Failed to reset record {} to pending: {}",
                        record.id,
                        reset_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&self, record: &AnalysisRecord) -> Result<(), PipelineError> {
        // Stage 3: time-boxed read access + extraction.
        let grant = self
            .documents
            .issue_read_grant(&record.document_ref)
            .instrument(info_span!("issue_grant"))
            .await?;
        let content = self
            .documents
            .fetch(&grant)
            .instrument(info_span!("fetch_document"))
            .await?;
        let mut text = info_span!("extract_text").in_scope(|| self.extractor.extract(&content))?;

        if text.len() > self.options.max_content_length {
            log::warn!(
                "Content truncated to {} chars for record {}",
                self.options.max_content_length,
                record.id
            );
            truncate_to_char_boundary(&mut text, self.options.max_content_length);
        }

        // Stage 4: active template, falling back to the baseline
        // instruction set rather than failing the job.
        let key = TemplateKey::new(
            self.options.environment.clone(),
            self.options.agent_type.clone(),
            self.options.task_type.clone(),
        );
        let instructions = match self.templates.get_active(&key) {
            Ok(Some(template)) => template.content.clone(),
            Ok(None) => {
                log::warn!(
                    "No active template for {}/{}/{}, using baseline instructions",
                    key.environment,
                    key.agent_type,
                    key.task_type
                );
                baseline_instructions().to_string()
            }
            Err(e) => {
                log::warn!(
                    "Template store unavailable ({}), using baseline instructions",
                    e
                );
                baseline_instructions().to_string()
            }
        };

        // Stage 5: inference.
        let reply = self
            .inference
            .analyze(&InferenceRequest {
                content: text.clone(),
                instructions,
                owner_ref: record.owner_id.clone(),
            })
            .instrument(info_span!("inference"))
            .await?;

        // Stage 6+7: merge everything in one transaction.
        let metadata = if reply.metadata.is_empty() {
            None
        } else {
            Some(serde_json::Value::Object(reply.metadata).to_string())
        };
        let update = AnalysisUpdate {
            raw_content: text,
            optimized_content: reply.optimized_content,
            score: reply.score,
            suggestions: reply
                .suggestions
                .into_iter()
                .map(|s| Suggestion {
                    category: s.category,
                    description: s.description,
                    priority: s.priority,
                })
                .collect(),
            candidate: CandidateInfo {
                name: reply.candidate_info.name,
                email: reply.candidate_info.email,
                phone: reply.candidate_info.phone,
                skills: reply.candidate_info.skills,
                experience: reply.candidate_info.experience,
            },
            metadata,
        };
        info_span!("merge_results")
            .in_scope(|| record_repo::apply_analysis(&self.db, &record.id, &update))?;

        Ok(())
    }
}

/// Truncates a string to at most `max` bytes without splitting a character.
fn truncate_to_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
