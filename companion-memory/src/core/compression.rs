//! Batch compression of questionnaire answers into short digests
//!
//! Input lives at `<root>/<user>/<role>_sets/<layer>/question_<n>.json`,
//! digests are written to `<root>/<user>/rolecard/<role>set<user>/<layer>/question_<n>.txt`.
//!
//! A job scans every (role, layer) pair, then compresses files in batches of
//! `concurrent_limit`. A batch normally runs in parallel; if a parallel task
//! dies, the rest of the job runs one file at a time. Per-file failures are
//! retried, counted and reported; they never stop the job.

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use companion_llm::{GenerateOptions, LlmClient};

use crate::core::progress::{JobSummary, ProgressSnapshot, ProgressTracker};
use crate::core::retry::{RetryConfig, RetryPolicy};
use crate::models::{MemoryError, MemoryResult};

static QUESTION_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^question_(\d+)\.json$").unwrap());

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    pub root_dir: PathBuf,
    /// Batch size, and therefore the cap on in-flight compressions.
    pub concurrent_limit: usize,
    pub retry: RetryConfig,
    pub progress_update_threshold: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Number of role A questions a layer must have before it is compressed.
    /// Defaults to the highest question number found in the layer.
    pub expected_role_a_total: Option<usize>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("storage/userdata"),
            concurrent_limit: 5,
            retry: RetryConfig::fixed(2, 1000),
            progress_update_threshold: 5,
            temperature: 0.7,
            max_tokens: 200,
            expected_role_a_total: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QuestionRole {
    A,
    B,
    C,
}

impl QuestionRole {
    pub const ALL: [QuestionRole; 3] = [QuestionRole::A, QuestionRole::B, QuestionRole::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionRole::A => "A",
            QuestionRole::B => "B",
            QuestionRole::C => "C",
        }
    }

    pub fn set_name(&self) -> &'static str {
        match self {
            QuestionRole::A => "Aset",
            QuestionRole::B => "Bset",
            QuestionRole::C => "Cset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionLayer {
    Basic,
    Emotional,
}

impl QuestionLayer {
    pub const ALL: [QuestionLayer; 2] = [QuestionLayer::Basic, QuestionLayer::Emotional];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionLayer::Basic => "basic",
            QuestionLayer::Emotional => "emotional",
        }
    }
}

pub fn category(role: QuestionRole, layer: QuestionLayer) -> String {
    format!("{}_{}", role.set_name(), layer.as_str())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionFile {
    pub role: QuestionRole,
    pub layer: QuestionLayer,
    pub order: u32,
    pub path: PathBuf,
}

impl QuestionFile {
    pub fn file_name(&self) -> String {
        format!("question_{}.json", self.order)
    }

    pub fn digest_name(&self) -> String {
        format!("question_{}.txt", self.order)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerScan {
    pub role: QuestionRole,
    pub layer: QuestionLayer,
    /// Sorted by question number.
    pub files: Vec<QuestionFile>,
    /// Highest question number present.
    pub max_order: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub significance: String,
    #[serde(default)]
    pub answer: String,
}

impl QuestionAnswer {
    pub fn is_complete(&self) -> bool {
        !self.question.trim().is_empty() && !self.answer.trim().is_empty()
    }
}

/// Path scheme of the questionnaire input and digest output trees
#[derive(Debug, Clone)]
pub struct QuestionnaireTree {
    root: PathBuf,
}

impl QuestionnaireTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self, user_id: &str, role: QuestionRole, layer: QuestionLayer) -> PathBuf {
        self.root
            .join(user_id)
            .join(format!("{}_sets", role.as_str()))
            .join(layer.as_str())
    }

    pub fn output_dir(&self, user_id: &str, role: QuestionRole, layer: QuestionLayer) -> PathBuf {
        self.root
            .join(user_id)
            .join("rolecard")
            .join(format!("{}{}", role.set_name(), user_id))
            .join(layer.as_str())
    }

    /// A missing layer directory scans as empty.
    pub async fn scan_layer(
        &self,
        user_id: &str,
        role: QuestionRole,
        layer: QuestionLayer,
    ) -> MemoryResult<LayerScan> {
        let dir = self.input_dir(user_id, role, layer);
        let mut scan = LayerScan {
            role,
            layer,
            files: Vec::new(),
            max_order: 0,
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(scan),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(order) = name
                .to_str()
                .and_then(|n| QUESTION_FILE.captures(n))
                .and_then(|c| c[1].parse::<u32>().ok())
            else {
                continue;
            };
            scan.max_order = scan.max_order.max(order as usize);
            scan.files.push(QuestionFile {
                role,
                layer,
                order,
                path: entry.path(),
            });
        }

        scan.files.sort_by_key(|f| f.order);
        Ok(scan)
    }
}

/// Turns one question/answer pair into a short digest
#[async_trait]
pub trait DigestCompressor: Send + Sync {
    async fn compress(&self, item: &QuestionAnswer) -> MemoryResult<String>;
}

pub fn build_compress_prompt(item: &QuestionAnswer) -> String {
    format!(
        "You are an expert at condensing text. Extract the core of the question and \
         the key points of the answer, and compress the answer to at most 100 characters. \
         Output only the compressed text.\n\
         Question: {}\n\
         Significance: {}\n\
         Answer: {}",
        item.question, item.significance, item.answer
    )
}

pub struct LlmDigestCompressor {
    llm: Arc<dyn LlmClient>,
    options: GenerateOptions,
}

impl LlmDigestCompressor {
    pub fn new(llm: Arc<dyn LlmClient>, options: GenerateOptions) -> Self {
        Self { llm, options }
    }

    pub fn from_config(llm: Arc<dyn LlmClient>, config: &CompressionConfig) -> Self {
        Self::new(
            llm,
            GenerateOptions::new(config.temperature, config.max_tokens),
        )
    }
}

#[async_trait]
impl DigestCompressor for LlmDigestCompressor {
    async fn compress(&self, item: &QuestionAnswer) -> MemoryResult<String> {
        let prompt = build_compress_prompt(item);
        let digest = self.llm.generate(&prompt, self.options).await?;
        let digest = digest.trim();
        if digest.is_empty() {
            return Err(MemoryError::Llm(companion_llm::LlmError::EmptyResponse));
        }
        Ok(digest.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Scanning,
    Compressing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Parallel,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        user_id: String,
        total_questions: usize,
        /// Role A layers left out because they are not fully answered.
        skipped_layers: Vec<String>,
    },
    Progress(ProgressSnapshot),
    FileFailed {
        question: String,
        role: QuestionRole,
        layer: QuestionLayer,
        error: String,
    },
    /// Job-level failure; no further events follow.
    Error { scope: String, error: String },
    Complete {
        summary: JobSummary,
        mode: ExecutionMode,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionReport {
    pub state: JobState,
    pub mode: ExecutionMode,
    pub skipped_layers: Vec<String>,
    pub summary: JobSummary,
}

struct FileOutcome {
    file: QuestionFile,
    result: Result<(), String>,
}

/// Mutable state of one running job
struct CompressionJob {
    user_id: String,
    state: JobState,
    mode: ExecutionMode,
    tracker: ProgressTracker,
    last_reported: Option<usize>,
    events: mpsc::Sender<ProgressEvent>,
}

impl CompressionJob {
    fn new(user_id: &str, events: mpsc::Sender<ProgressEvent>) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: JobState::Idle,
            mode: ExecutionMode::Parallel,
            tracker: ProgressTracker::new(user_id, 0),
            last_reported: None,
            events,
        }
    }

    fn transition(&mut self, state: JobState) {
        debug!("Compression job for {}: {:?} -> {:?}", self.user_id, self.state, state);
        self.state = state;
    }

    fn downgrade(&mut self) {
        if self.mode == ExecutionMode::Parallel {
            warn!(
                "Parallel compression failed for {}, continuing sequentially",
                self.user_id
            );
            self.mode = ExecutionMode::Sequential;
        }
    }

    async fn emit(&self, event: ProgressEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Progress receiver for {} dropped", self.user_id);
        }
    }

    async fn report_progress(&mut self) {
        let snapshot = self.tracker.progress();
        if self.last_reported == Some(snapshot.processed) {
            return;
        }
        self.last_reported = Some(snapshot.processed);
        self.emit(ProgressEvent::Progress(snapshot)).await;
    }

    async fn record(&mut self, outcome: FileOutcome, threshold: usize) {
        let FileOutcome { file, result } = outcome;
        let category = category(file.role, file.layer);
        match result {
            Ok(()) => self.tracker.record_success(&category),
            Err(error) => {
                warn!(
                    "Compression of {}/{} failed: {}",
                    category,
                    file.file_name(),
                    error
                );
                self.tracker.record_failure(&category, file.file_name());
                self.emit(ProgressEvent::FileFailed {
                    question: file.file_name(),
                    role: file.role,
                    layer: file.layer,
                    error,
                })
                .await;
            },
        }

        let processed = self.tracker.processed();
        let total = self.tracker.progress().total;
        if processed % threshold.max(1) == 0 || processed == total {
            self.report_progress().await;
        }
    }
}

pub struct BatchCompressionPipeline {
    tree: QuestionnaireTree,
    compressor: Arc<dyn DigestCompressor>,
    config: CompressionConfig,
    retry: RetryPolicy,
}

impl BatchCompressionPipeline {
    pub fn new(compressor: Arc<dyn DigestCompressor>, config: CompressionConfig) -> Self {
        Self {
            tree: QuestionnaireTree::new(config.root_dir.clone()),
            compressor,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        }
    }

    pub fn tree(&self) -> &QuestionnaireTree {
        &self.tree
    }

    /// Run the job on a Tokio task and stream its events.
    pub fn spawn(self: Arc<Self>, user_id: impl Into<String>) -> ReceiverStream<ProgressEvent> {
        let user_id = user_id.into();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            if let Err(e) = self.run(&user_id, tx).await {
                error!("Compression job for {} failed: {}", user_id, e);
            }
        });
        ReceiverStream::new(rx)
    }

    /// Run one job to completion, sending events to `events`.
    ///
    /// Ends with exactly one `Complete` or `Error` event.
    pub async fn run(
        &self,
        user_id: &str,
        events: mpsc::Sender<ProgressEvent>,
    ) -> MemoryResult<CompressionReport> {
        let mut job = CompressionJob::new(user_id, events);
        match self.run_job(&mut job).await {
            Ok(report) => Ok(report),
            Err(e) => {
                job.transition(JobState::Error);
                error!("Compression job for {} aborted: {}", user_id, e);
                job.emit(ProgressEvent::Error {
                    scope: "system".to_string(),
                    error: e.to_string(),
                })
                .await;
                Err(e)
            },
        }
    }

    async fn run_job(&self, job: &mut CompressionJob) -> MemoryResult<CompressionReport> {
        validate_user_id(&job.user_id)?;
        info!("Starting compression job for {}", job.user_id);

        job.transition(JobState::Scanning);
        let mut layers = Vec::new();
        let mut skipped_layers = Vec::new();
        for role in QuestionRole::ALL {
            for layer in QuestionLayer::ALL {
                let scan = self.tree.scan_layer(&job.user_id, role, layer).await?;
                if scan.files.is_empty() {
                    continue;
                }
                if role == QuestionRole::A && !self.role_a_complete(&scan) {
                    info!(
                        "Skipping {}: {} of {} questions answered",
                        category(role, layer),
                        scan.files.len(),
                        self.expected_role_a(&scan)
                    );
                    skipped_layers.push(category(role, layer));
                    continue;
                }
                layers.push(scan);
            }
        }

        let total: usize = layers.iter().map(|l| l.files.len()).sum();
        job.tracker.set_total(total);
        job.emit(ProgressEvent::Start {
            user_id: job.user_id.clone(),
            total_questions: total,
            skipped_layers: skipped_layers.clone(),
        })
        .await;

        job.transition(JobState::Compressing);
        for scan in layers {
            let output_dir = self.tree.output_dir(&job.user_id, scan.role, scan.layer);
            tokio::fs::create_dir_all(&output_dir).await?;
            self.compress_layer(job, scan.files, &output_dir).await;
        }

        job.transition(JobState::Complete);
        let summary = job.tracker.summary();
        info!(
            "Compression job for {} complete: {} succeeded, {} failed in {}ms",
            job.user_id, summary.success, summary.failed, summary.duration_ms
        );
        job.emit(ProgressEvent::Complete {
            summary: summary.clone(),
            mode: job.mode,
        })
        .await;

        Ok(CompressionReport {
            state: job.state,
            mode: job.mode,
            skipped_layers,
            summary,
        })
    }

    fn expected_role_a(&self, scan: &LayerScan) -> usize {
        self.config.expected_role_a_total.unwrap_or(scan.max_order)
    }

    fn role_a_complete(&self, scan: &LayerScan) -> bool {
        let expected = self.expected_role_a(scan);
        expected > 0 && scan.files.len() * 100 / expected >= 100
    }

    async fn compress_layer(
        &self,
        job: &mut CompressionJob,
        files: Vec<QuestionFile>,
        output_dir: &Path,
    ) {
        let threshold = self.config.progress_update_threshold;
        for batch in files.chunks(self.config.concurrent_limit.max(1)) {
            match job.mode {
                ExecutionMode::Parallel => {
                    let handles: Vec<_> = batch
                        .iter()
                        .map(|file| tokio::spawn(self.process_task(file.clone(), output_dir)))
                        .collect();

                    let mut failed_tasks = Vec::new();
                    for (file, joined) in batch.iter().zip(join_all(handles).await) {
                        match joined {
                            Ok(outcome) => job.record(outcome, threshold).await,
                            Err(e) => {
                                warn!("Compression task for {} died: {}", file.file_name(), e);
                                failed_tasks.push(file.clone());
                            },
                        }
                    }

                    if !failed_tasks.is_empty() {
                        job.downgrade();
                        for file in failed_tasks {
                            let outcome = self.process_isolated(file, output_dir).await;
                            job.record(outcome, threshold).await;
                        }
                    }
                },
                ExecutionMode::Sequential => {
                    for file in batch {
                        let outcome = self.process_isolated(file.clone(), output_dir).await;
                        job.record(outcome, threshold).await;
                    }
                },
            }
            job.report_progress().await;
        }
    }

    /// Run one file on its own task so a panic is contained to that file.
    async fn process_isolated(&self, file: QuestionFile, output_dir: &Path) -> FileOutcome {
        match tokio::spawn(self.process_task(file.clone(), output_dir)).await {
            Ok(outcome) => outcome,
            Err(e) => FileOutcome {
                file,
                result: Err(format!("compression task died: {e}")),
            },
        }
    }

    fn process_task(
        &self,
        file: QuestionFile,
        output_dir: &Path,
    ) -> impl std::future::Future<Output = FileOutcome> + Send + 'static {
        let compressor = self.compressor.clone();
        let retry = self.retry.clone();
        let output = output_dir.join(file.digest_name());
        async move {
            let result = compress_file(compressor.as_ref(), &retry, &file, &output).await;
            FileOutcome { file, result }
        }
    }
}

async fn compress_file(
    compressor: &dyn DigestCompressor,
    retry: &RetryPolicy,
    file: &QuestionFile,
    output: &Path,
) -> Result<(), String> {
    let raw = tokio::fs::read_to_string(&file.path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", file.path.display()))?;
    let item: QuestionAnswer =
        serde_json::from_str(&raw).map_err(|e| format!("malformed answer file: {e}"))?;
    if !item.is_complete() {
        return Err("missing required fields".to_string());
    }

    let name = format!("compress {}", file.path.display());
    let digest = retry
        .execute(&name, || compressor.compress(&item))
        .await
        .map_err(|e| e.to_string())?;

    tokio::fs::write(output, digest)
        .await
        .map_err(|e| format!("cannot write {}: {e}", output.display()))?;
    debug!("Wrote digest {}", output.display());
    Ok(())
}

fn validate_user_id(user_id: &str) -> MemoryResult<()> {
    if user_id.is_empty()
        || user_id.starts_with('.')
        || user_id.contains(['/', '\\', '\0'])
    {
        return Err(MemoryError::InvalidOwnerId(user_id.to_string()));
    }
    Ok(())
}
