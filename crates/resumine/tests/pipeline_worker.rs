//! End-to-end scenarios: producer → queue → worker → pipeline → record,
//! with a scripted inference client standing in for the remote service.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use resumine::db::record_repo::{self, AnalysisStatus};
use resumine::db::template_repo::TemplateDraft;
use resumine::db::Database;
use resumine::docstore::{FsDocumentStore, GrantSealer};
use resumine::extract::ExtractorRegistry;
use resumine::inference::{
    AnalysisReply, CandidateProfile, InferenceClient, InferenceError, InferenceRequest,
    SuggestedEdit,
};
use resumine::pipeline::{AnalysisPipeline, PipelineOptions};
use resumine::queue::{InMemoryQueue, JobMessage, PoisonMessage, QueueTransport};
use resumine::templates::{TemplateCache, TemplateKey, TemplateStore};
use resumine::worker::{AnalysisWorker, WorkerOptions};
use resumine::JobProducer;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f000102030405060708090a0b0c0d0e0f";

/// Inference client that replays a scripted sequence of outcomes and
/// records every request it receives.
struct ScriptedInference {
    script: Mutex<VecDeque<Result<AnalysisReply, InferenceError>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    fn new(script: Vec<Result<AnalysisReply, InferenceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn seen_instructions(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.instructions.clone())
            .collect()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn analyze(&self, request: &InferenceRequest) -> Result<AnalysisReply, InferenceError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(InferenceError::EmptyReply))
    }
}

fn good_reply() -> AnalysisReply {
    AnalysisReply {
        score: 82.0,
        optimized_content: "Senior Software Engineer with impact...".to_string(),
        suggestions: vec![SuggestedEdit {
            category: "Impact".to_string(),
            description: "Quantify the migration project outcomes".to_string(),
            priority: 2,
        }],
        candidate_info: CandidateProfile {
            name: Some("Jane Doe".to_string()),
            email: Some("jane@example.com".to_string()),
            phone: None,
            skills: vec!["Rust".to_string()],
            experience: vec!["Acme Corp, 2019-2024".to_string()],
        },
        metadata: serde_json::Map::new(),
    }
}

fn transient_error() -> InferenceError {
    InferenceError::ServiceStatus {
        status: 503,
        body: "upstream timeout".to_string(),
    }
}

struct Harness {
    _documents_dir: TempDir,
    db: Database,
    queue: Arc<InMemoryQueue>,
    producer: JobProducer,
    worker: AnalysisWorker,
    inference: Arc<ScriptedInference>,
    templates: Arc<TemplateStore>,
}

fn harness(script: Vec<Result<AnalysisReply, InferenceError>>) -> Harness {
    let documents_dir = TempDir::new().unwrap();
    std::fs::write(
        documents_dir.path().join("resume.txt"),
        "Software Engineer with 5 years of Rust experience",
    )
    .unwrap();

    let db = Database::open_in_memory().unwrap();
    let queue = Arc::new(InMemoryQueue::new());
    let inference = Arc::new(ScriptedInference::new(script));
    let templates = Arc::new(TemplateStore::new(
        db.clone(),
        TemplateCache::new(Duration::from_secs(60)),
    ));

    let documents = Arc::new(FsDocumentStore::new(
        documents_dir.path(),
        GrantSealer::from_hex_key(TEST_KEY).unwrap(),
        Duration::from_secs(60),
    ));

    let pipeline = Arc::new(AnalysisPipeline::new(
        db.clone(),
        documents,
        ExtractorRegistry::new(),
        Arc::clone(&templates),
        Arc::clone(&inference) as Arc<dyn InferenceClient>,
        PipelineOptions::default(),
    ));

    let worker = AnalysisWorker::new(
        queue.clone(),
        pipeline,
        db.clone(),
        WorkerOptions {
            batch_size: 4,
            visibility_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(10),
            max_dequeue_count: 3,
        },
    );

    Harness {
        _documents_dir: documents_dir,
        producer: JobProducer::new(db.clone(), queue.clone()),
        db,
        queue,
        worker,
        inference,
        templates,
    }
}

#[tokio::test]
async fn successful_job_analyzes_record_and_deletes_message() {
    let h = harness(vec![Ok(good_reply())]);

    let record = h
        .producer
        .submit("owner-1", "resume.txt", Some("resume.txt"))
        .await
        .unwrap();

    let handled = h.worker.poll_once().await.unwrap();
    assert_eq!(handled, 1);

    let stored = record_repo::find_by_id(&h.db, &record.id).unwrap().unwrap();
    assert_eq!(stored.status, AnalysisStatus::Analyzed);
    assert_eq!(stored.score, Some(82.0));
    assert!(stored
        .raw_content
        .as_deref()
        .unwrap()
        .contains("Rust experience"));

    let suggestions = record_repo::suggestions_for(&h.db, &record.id).unwrap();
    assert_eq!(suggestions.len(), 1);

    assert!(h.queue.is_empty(), "message must be deleted on success");
    assert!(h.queue.poison_messages().is_empty());
}

#[tokio::test]
async fn transient_failure_resets_record_and_leaves_message() {
    let h = harness(vec![Err(transient_error()), Ok(good_reply())]);

    let record = h
        .producer
        .submit("owner-1", "resume.txt", None)
        .await
        .unwrap();

    // First delivery fails transiently.
    h.worker.poll_once().await.unwrap();
    let stored = record_repo::find_by_id(&h.db, &record.id).unwrap().unwrap();
    assert_eq!(
        stored.status,
        AnalysisStatus::Pending,
        "record must be visibly retry-eligible"
    );
    assert_eq!(h.queue.len(), 1, "message must stay for redelivery");
    assert!(h.queue.poison_messages().is_empty());

    // The message is still leased; nothing to receive yet.
    assert_eq!(h.worker.poll_once().await.unwrap(), 0);

    // After the visibility timeout the message reappears and succeeds.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.worker.poll_once().await.unwrap(), 1);

    let stored = record_repo::find_by_id(&h.db, &record.id).unwrap().unwrap();
    assert_eq!(stored.status, AnalysisStatus::Analyzed);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn missing_record_is_poisoned_on_first_delivery() {
    let h = harness(vec![Ok(good_reply())]);

    h.queue
        .enqueue(&JobMessage {
            record_id: "deleted-record".to_string(),
            owner_id: "owner-1".to_string(),
        })
        .await
        .unwrap();

    h.worker.poll_once().await.unwrap();

    assert!(h.queue.is_empty(), "terminal failures delete the message");
    let poison = h.queue.poison_messages();
    assert_eq!(poison.len(), 1);
    let entry: PoisonMessage = serde_json::from_str(&poison[0]).unwrap();
    assert_eq!(entry.record_id.as_deref(), Some("deleted-record"));
    assert!(entry.error_reason.contains("not found"));
}

#[tokio::test]
async fn owner_mismatch_is_treated_as_missing_record() {
    let h = harness(vec![Ok(good_reply())]);

    let record = h
        .producer
        .submit("owner-1", "resume.txt", None)
        .await
        .unwrap();
    // Drain the legitimate message and replace it with a forged owner.
    let batch = h
        .queue
        .receive_batch(1, Duration::from_millis(1))
        .await
        .unwrap();
    h.queue.delete(&batch[0].handle).await.unwrap();
    h.queue
        .enqueue(&JobMessage {
            record_id: record.id.clone(),
            owner_id: "intruder".to_string(),
        })
        .await
        .unwrap();

    h.worker.poll_once().await.unwrap();

    assert_eq!(h.queue.poison_messages().len(), 1);
    let stored = record_repo::find_by_id(&h.db, &record.id).unwrap().unwrap();
    assert_eq!(stored.status, AnalysisStatus::Failed);
}

#[tokio::test]
async fn malformed_payload_is_poisoned_with_original_body() {
    let h = harness(vec![Ok(good_reply())]);

    h.queue.push_raw("{ this is not json");
    h.worker.poll_once().await.unwrap();

    assert!(h.queue.is_empty());
    let poison = h.queue.poison_messages();
    assert_eq!(poison.len(), 1);
    let entry: PoisonMessage = serde_json::from_str(&poison[0]).unwrap();
    assert!(entry.record_id.is_none());
    assert_eq!(entry.raw_payload.as_deref(), Some("{ this is not json"));
}

#[tokio::test]
async fn retry_budget_exhaustion_poisons_and_fails_record() {
    let h = harness(vec![
        Err(transient_error()),
        Err(transient_error()),
        Err(transient_error()),
    ]);

    let record = h
        .producer
        .submit("owner-1", "resume.txt", None)
        .await
        .unwrap();

    // Deliveries 1 and 2 fail transiently; delivery 3 hits the budget.
    for _ in 0..2 {
        assert_eq!(h.worker.poll_once().await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    assert_eq!(h.worker.poll_once().await.unwrap(), 1);

    assert!(h.queue.is_empty());
    let poison = h.queue.poison_messages();
    assert_eq!(poison.len(), 1);
    let entry: PoisonMessage = serde_json::from_str(&poison[0]).unwrap();
    assert_eq!(entry.error_reason, "max retries exceeded");

    let stored = record_repo::find_by_id(&h.db, &record.id).unwrap().unwrap();
    assert_eq!(stored.status, AnalysisStatus::Failed);
    assert!(stored.score.is_none(), "failed records carry no score");
}

#[tokio::test]
async fn active_template_instructions_reach_inference() {
    let h = harness(vec![Ok(good_reply()), Ok(good_reply())]);

    // First run: no template, baseline instructions.
    h.producer
        .submit("owner-1", "resume.txt", None)
        .await
        .unwrap();
    h.worker.poll_once().await.unwrap();

    // Activate a custom template, then run a second job.
    h.templates
        .create(&TemplateDraft {
            agent_type: "resume-analyzer".to_string(),
            task_type: "analysis".to_string(),
            environment: "production".to_string(),
            content: "Focus on leadership signals.".to_string(),
            created_by: None,
        })
        .unwrap();
    let key = TemplateKey::new("production", "resume-analyzer", "analysis");
    assert!(h.templates.activate_version(&key, 1).unwrap());

    h.producer
        .submit("owner-1", "resume.txt", None)
        .await
        .unwrap();
    h.worker.poll_once().await.unwrap();

    let seen = h.inference.seen_instructions();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains("expert resume analyzer"), "baseline fallback");
    assert_eq!(seen[1], "Focus on leadership signals.");
}
