/*!
 * Translation jobs.
 *
 * `TranslationEngine::start` segments the document, opens (or resumes) the job's
 * checkpoint and spawns the job loop. The loop dispatches units in ascending order to
 * at most `concurrency` workers and is the only place results are recorded: workers
 * send their outcomes back over a channel, the loop writes them to the checkpoint and
 * updates progress. Page jobs also schedule seam repairs as soon as both neighbours of
 * a junction are translated.
 *
 * Cancellation stops dispatch; units already in flight are allowed to finish and are
 * recorded. Fatal errors (terminal provider errors, fail-fast failures, checkpoint write
 * errors) do the same, then the job returns the error.
 */

use futures::future::FutureExt;
use futures::stream::{self, Stream};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app_config::{Algorithm, Config, ModelSpec, SeamConfig, WindowConfig};
use crate::checkpoint::{CheckpointManager, CheckpointRecord, CheckpointStore, FailureRecord, JobStatus};
use crate::document::Document;
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{ModelInterface, ModelParams};
use crate::translation::cost::{CostEstimate, CostEstimator};
use crate::translation::page::{assemble_pages, placeholder, seam_candidate, validate_pages, SeamCandidate, SeamRepair};
use crate::translation::prompts;
use crate::translation::retry::RetryPolicy;
use crate::translation::unit::{fingerprint, FinishReason, TokenUsage, TranslationUnit};
use crate::translation::window::{assemble_windows, MatchThresholds, OverlapMatch, WindowedDocument};
use crate::translation::worker::{repair_junction, translate_unit, UnitOutcome, WorkerContext};

/// Cooperative cancellation flag shared between a caller and a running job
#[derive(Debug, Clone)]
pub struct CancelSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    /// Stop dispatching new units; in-flight units still finish
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// What to translate and how
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub document: Document,
    pub source_lang: String,
    pub target_lang: String,
    pub algorithm: Algorithm,
    /// Overrides `translation.concurrency`
    pub concurrency: Option<usize>,
    /// Resume this job id instead of starting a new job
    pub resume_from: Option<String>,
    pub cancel: CancelSignal,
}

impl JobRequest {
    pub fn new(
        document: Document,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            document,
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            algorithm,
            concurrency: None,
            resume_from: None,
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn resume(mut self, job_id: impl Into<String>) -> Self {
        self.resume_from = Some(job_id.into());
        self
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Snapshot of a running job
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    /// Most recently dispatched unit
    pub current_unit: Option<usize>,
    pub total_units: usize,
    pub completed: usize,
    pub failed: usize,
    pub tokens_used: u64,
    pub cost_so_far: f64,
    pub elapsed: Duration,
    pub message: String,
}

impl JobProgress {
    /// Share of units with a final outcome, in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total_units == 0 {
            return 1.0;
        }
        (self.completed + self.failed) as f64 / self.total_units as f64
    }
}

/// Final outcome of a job that was not aborted
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    /// Assembled translation; untranslated units appear as placeholders
    pub text: String,
    pub total_units: usize,
    pub completed: Vec<usize>,
    pub failed: BTreeMap<usize, FailureRecord>,
    /// Units never attempted because the job was cancelled
    pub skipped: Vec<usize>,
    pub tokens_used: TokenUsage,
    pub cost: f64,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

/// Handle to a running job
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    progress: watch::Receiver<JobProgress>,
    cancel: CancelSignal,
    task: JoinHandle<Result<JobReport, TranslationError>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Latest progress snapshot
    pub fn progress(&self) -> JobProgress {
        self.progress.borrow().clone()
    }

    /// Receiver notified on every progress change
    pub fn subscribe(&self) -> watch::Receiver<JobProgress> {
        self.progress.clone()
    }

    /// Stream of progress snapshots, starting with the current one and ending with the job
    pub fn progress_stream(&self) -> impl Stream<Item = JobProgress> + Send + 'static {
        stream::unfold((self.progress.clone(), true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let progress = rx.borrow_and_update().clone();
            Some((progress, (rx, false)))
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Wait for the job to finish
    pub async fn result(self) -> Result<JobReport, TranslationError> {
        self.task
            .await
            .map_err(|e| TranslationError::JobPanicked(e.to_string()))?
    }
}

/// Units of a document as the chosen algorithm sees them
#[derive(Debug, Clone)]
enum Segmentation {
    Pages(Vec<TranslationUnit>),
    Windows(WindowedDocument),
}

impl Segmentation {
    fn units(&self) -> &[TranslationUnit] {
        match self {
            Self::Pages(units) => units,
            Self::Windows(document) => &document.units,
        }
    }
}

/// Entry point for estimating and running translation jobs
#[derive(Debug, Clone)]
pub struct TranslationEngine {
    config: Config,
    model: ModelSpec,
    translator: Arc<dyn ModelInterface>,
    store: Arc<dyn CheckpointStore>,
    estimator: CostEstimator,
}

impl TranslationEngine {
    pub fn new(
        config: Config,
        translator: Arc<dyn ModelInterface>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self, TranslationError> {
        let model = config
            .model_spec()
            .map_err(|e| TranslationError::InvalidConfig(e.to_string()))?;
        let estimator = CostEstimator::new(config.cost.clone());
        Ok(Self {
            config,
            model,
            translator,
            store,
            estimator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    fn segment(&self, document: &Document, algorithm: Algorithm) -> Result<Segmentation, TranslationError> {
        match algorithm {
            Algorithm::Page => {
                validate_pages(&document.units)?;
                Ok(Segmentation::Pages(document.units.clone()))
            }
            Algorithm::SlidingWindow => {
                let windowed =
                    WindowedDocument::from_units(&document.units, &self.config.window, self.config.cost.chars_per_token)?;
                Ok(Segmentation::Windows(windowed))
            }
        }
    }

    /// Predict tokens and cost for a document; never calls the model
    pub fn estimate(
        &self,
        document: &Document,
        algorithm: Algorithm,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<CostEstimate, TranslationError> {
        let segmentation = self.segment(document, algorithm)?;
        Ok(self
            .estimator
            .estimate(segmentation.units(), &self.model, source_lang, target_lang))
    }

    /// Start (or resume) a job; returns once its checkpoint is open
    pub async fn start(&self, request: JobRequest) -> Result<JobHandle, TranslationError> {
        let segmentation = self.segment(&request.document, request.algorithm)?;
        let units = segmentation.units();
        let job_id = request
            .resume_from
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let expected = CheckpointRecord::new(
            job_id.clone(),
            request.algorithm,
            units.len(),
            request.source_lang.clone(),
            request.target_lang.clone(),
            self.model.full_name(),
            fingerprint(units),
        );
        let price = self.estimator.price_table().price_for(&self.model);
        let manager = match request.resume_from {
            Some(_) => CheckpointManager::resume(self.store.clone(), &expected).await?,
            None => CheckpointManager::create(self.store.clone(), expected).await?,
        };
        let mut manager = manager.with_price(price);
        manager.set_status(JobStatus::Running).await?;

        let mut concurrency = request
            .concurrency
            .unwrap_or(self.config.translation.concurrency)
            .max(1);
        if request.algorithm == Algorithm::SlidingWindow && self.config.window.context_passing && concurrency > 1 {
            info!("Context passing between windows is on, translating windows one at a time");
            concurrency = 1;
        }

        info!(
            "Starting job {}: {} {} unit(s), {} -> {}, model {}, concurrency {}",
            job_id,
            units.len(),
            request.algorithm,
            request.source_lang,
            request.target_lang,
            self.model,
            concurrency
        );

        let ctx = Arc::new(self.worker_context(&request.source_lang, &request.target_lang, request.algorithm));
        let started = Instant::now();
        let (progress_tx, progress_rx) = watch::channel(snapshot(manager.record(), None, started, "Starting"));

        let job = Job {
            manager,
            segmentation,
            ctx,
            concurrency,
            seam_config: self.config.seam.clone(),
            window_config: self.config.window.clone(),
            fail_fast: self.config.translation.fail_fast,
            cleanup_on_success: self.config.checkpoint.cleanup_on_success,
            progress: progress_tx,
            started,
            warnings: Vec::new(),
        };
        let task = tokio::spawn(job.run(request.cancel.subscribe()));

        Ok(JobHandle {
            job_id,
            progress: progress_rx,
            cancel: request.cancel,
            task,
        })
    }

    /// Start a job and wait for it
    pub async fn translate(&self, request: JobRequest) -> Result<JobReport, TranslationError> {
        self.start(request).await?.result().await
    }

    fn worker_context(&self, source_lang: &str, target_lang: &str, algorithm: Algorithm) -> WorkerContext {
        let settings = &self.config.translation;
        let provider = self.config.provider_config(self.model.provider);
        WorkerContext {
            translator: self.translator.clone(),
            retry: RetryPolicy::from(&settings.retry),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            system_prompt: prompts::system_prompt(&settings.system_prompt, source_lang, target_lang),
            reinforced_prompt: prompts::reinforced_system_prompt(&settings.system_prompt, source_lang, target_lang),
            params: ModelParams::from_settings(settings, provider.max_output_tokens),
            refusal_retry: settings.refusal_retry,
            resegment_on_truncation: settings.resegment_on_truncation,
            max_resegment_depth: settings.max_resegment_depth,
            preserve_whitespace: algorithm == Algorithm::SlidingWindow,
        }
    }
}

fn snapshot(record: &CheckpointRecord, current_unit: Option<usize>, started: Instant, message: &str) -> JobProgress {
    JobProgress {
        job_id: record.job_id.clone(),
        status: record.status,
        current_unit,
        total_units: record.total_units,
        completed: record.completed.len(),
        failed: record.failed.len(),
        tokens_used: record.ledger.total_tokens(),
        cost_so_far: record.ledger.cost,
        elapsed: started.elapsed(),
        message: message.to_string(),
    }
}

/// What a worker sends back to the job loop
#[derive(Debug)]
enum WorkerMessage {
    Unit { index: usize, outcome: UnitOutcome },
    Seam { left_index: usize, outcome: Result<SeamRepair, ProviderError> },
    Panicked(String),
}

/// Junctions waiting for repair
#[derive(Debug, Default)]
struct SeamQueue {
    queue: VecDeque<SeamCandidate>,
    /// Junctions already decided, repaired or not
    seen: HashSet<usize>,
}

impl SeamQueue {
    /// Queue the junction after `left` if both sides are translated and it needs repair
    fn offer(&mut self, left: usize, record: &CheckpointRecord, config: &SeamConfig) {
        if self.seen.contains(&left) || record.seams.contains_key(&left) {
            return;
        }
        let (Some(left_result), Some(right_result)) = (record.completed.get(&left), record.completed.get(&(left + 1)))
        else {
            return;
        };
        self.seen.insert(left);
        if let Some(candidate) = seam_candidate(left_result, right_result, config) {
            debug!("Queueing seam repair {}/{}", left, left + 1);
            self.queue.push_back(candidate);
        }
    }
}

/// State owned by the job loop
struct Job {
    manager: CheckpointManager,
    segmentation: Segmentation,
    ctx: Arc<WorkerContext>,
    concurrency: usize,
    seam_config: SeamConfig,
    window_config: WindowConfig,
    fail_fast: bool,
    cleanup_on_success: bool,
    progress: watch::Sender<JobProgress>,
    started: Instant,
    warnings: Vec<String>,
}

impl Job {
    fn is_paged(&self) -> bool {
        matches!(self.segmentation, Segmentation::Pages(_))
    }

    fn publish(&self, current_unit: Option<usize>, message: &str) {
        self.progress
            .send_replace(snapshot(self.manager.record(), current_unit, self.started, message));
    }

    fn context_for(&self, index: usize) -> Option<String> {
        match &self.segmentation {
            Segmentation::Windows(document) if self.window_config.context_passing => {
                document.context_for(index, self.window_config.context_chars)
            }
            _ => None,
        }
    }

    fn spawn_unit(&self, index: usize, tx: &mpsc::UnboundedSender<WorkerMessage>) {
        let unit = self.segmentation.units()[index].clone();
        let context = self.context_for(index);
        let ctx = self.ctx.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let message = match AssertUnwindSafe(translate_unit(ctx, unit, context)).catch_unwind().await {
                Ok(outcome) => WorkerMessage::Unit { index, outcome },
                Err(_) => WorkerMessage::Panicked(format!("worker for unit {} panicked", index)),
            };
            let _ = tx.send(message);
        });
    }

    fn spawn_seam(&self, candidate: SeamCandidate, tx: &mpsc::UnboundedSender<WorkerMessage>) {
        let left_index = candidate.left_index;
        let ctx = self.ctx.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let message = match AssertUnwindSafe(repair_junction(ctx, candidate)).catch_unwind().await {
                Ok(outcome) => WorkerMessage::Seam { left_index, outcome },
                Err(_) => WorkerMessage::Panicked(format!("seam worker {} panicked", left_index)),
            };
            let _ = tx.send(message);
        });
    }

    async fn run(mut self, mut cancel: watch::Receiver<bool>) -> Result<JobReport, TranslationError> {
        let total = self.manager.record().total_units;
        let mut pending: VecDeque<usize> = self.manager.resume_plan().into_iter().collect();
        let mut seams = SeamQueue::default();
        if self.is_paged() {
            for left in 0..total.saturating_sub(1) {
                seams.offer(left, self.manager.record(), &self.seam_config);
            }
        }
        if pending.len() < total {
            info!(
                "Job {}: {} unit(s) already done, {} to go",
                self.manager.job_id(),
                total - pending.len(),
                pending.len()
            );
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut in_flight = 0usize;
        let mut cancelled = *cancel.borrow_and_update();
        let mut watch_cancel = true;
        let mut fatal: Option<TranslationError> = None;
        self.publish(None, "Running");

        loop {
            while fatal.is_none() && !cancelled && in_flight < self.concurrency {
                if let Some(candidate) = seams.queue.pop_front() {
                    self.spawn_seam(candidate, &tx);
                } else if let Some(index) = pending.pop_front() {
                    self.spawn_unit(index, &tx);
                    self.publish(Some(index), &format!("Translating unit {}/{}", index + 1, total));
                } else {
                    break;
                }
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;
                changed = cancel.changed(), if watch_cancel && !cancelled => {
                    match changed {
                        Ok(()) => {
                            if *cancel.borrow_and_update() {
                                info!("Job {} cancelled, waiting for {} in-flight call(s)", self.manager.job_id(), in_flight);
                                cancelled = true;
                            }
                        }
                        Err(_) => watch_cancel = false,
                    }
                }
                Some(message) = rx.recv() => {
                    in_flight -= 1;
                    if let Err(e) = self.handle(message, &mut seams).await {
                        if fatal.is_none() {
                            error!("Job {} aborting: {}", self.manager.job_id(), e);
                            fatal = Some(e);
                        } else {
                            warn!("Further error while draining job {}: {}", self.manager.job_id(), e);
                        }
                    }
                }
            }
        }

        if let Some(error) = fatal {
            if let Err(e) = self.manager.set_status(JobStatus::Failed).await {
                warn!("Could not mark job {} as failed: {}", self.manager.job_id(), e);
            }
            self.publish(None, &format!("Failed: {}", error));
            return Err(error);
        }

        let unfinished = !pending.is_empty() || !seams.queue.is_empty();
        let status = if cancelled && unfinished {
            JobStatus::Cancelled
        } else if self.manager.record().failed.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithFailures
        };
        self.manager.set_status(status).await?;

        let report = self.report(status);
        info!(
            "Job {} {}: {}/{} unit(s) translated, {} failed, {} tokens, ${:.4}",
            report.job_id,
            status,
            report.completed.len(),
            report.total_units,
            report.failed.len(),
            report.tokens_used.total(),
            report.cost
        );
        self.publish(None, status.as_str());

        if status == JobStatus::Completed && self.cleanup_on_success {
            if let Err(e) = self.manager.cleanup().await {
                warn!("Could not remove checkpoint of job {}: {}", report.job_id, e);
            }
        }
        Ok(report)
    }

    /// Record one worker outcome; an error is fatal for the job
    async fn handle(&mut self, message: WorkerMessage, seams: &mut SeamQueue) -> Result<(), TranslationError> {
        match message {
            WorkerMessage::Unit {
                index,
                outcome: UnitOutcome::Completed(result),
            } => {
                if result.finish_reason == FinishReason::Truncated {
                    self.warnings
                        .push(format!("Unit {} may be incomplete: output was truncated", index + 1));
                }
                self.manager.record_unit(result).await?;
                if self.is_paged() {
                    if index > 0 {
                        seams.offer(index - 1, self.manager.record(), &self.seam_config);
                    }
                    seams.offer(index, self.manager.record(), &self.seam_config);
                }
                self.publish(None, &format!("Unit {} done", index + 1));
            }
            WorkerMessage::Unit {
                index,
                outcome: UnitOutcome::Failed(failure),
            } => {
                error!(
                    "Unit {} failed after {} attempt(s): {}",
                    index, failure.attempts, failure.message
                );
                let kind = failure.kind;
                let message = failure.message.clone();
                self.manager.record_failure(index, failure).await?;
                self.publish(None, &format!("Unit {} failed", index + 1));
                if self.fail_fast {
                    return Err(TranslationError::FailFast {
                        sequence_index: index,
                        kind,
                        message,
                    });
                }
            }
            WorkerMessage::Unit {
                index,
                outcome: UnitOutcome::Terminal(error, failure),
            } => {
                self.manager.record_failure(index, failure).await?;
                return Err(TranslationError::TerminalProvider(error));
            }
            WorkerMessage::Seam {
                left_index,
                outcome: Ok(repair),
            } => {
                if !repair.repaired {
                    self.warnings.push(format!(
                        "Seam between pages {} and {} left as is: unusable repair response",
                        left_index + 1,
                        left_index + 2
                    ));
                }
                self.manager.record_seam(repair).await?;
            }
            WorkerMessage::Seam {
                left_index,
                outcome: Err(error),
            } => {
                if error.is_terminal() {
                    return Err(TranslationError::TerminalProvider(error));
                }
                warn!("Seam {}/{} not repaired: {}", left_index, left_index + 1, error);
                self.warnings.push(format!(
                    "Seam between pages {} and {} not repaired: {}",
                    left_index + 1,
                    left_index + 2,
                    error
                ));
            }
            WorkerMessage::Panicked(message) => return Err(TranslationError::JobPanicked(message)),
        }
        Ok(())
    }

    fn assemble(&mut self) -> String {
        let record = self.manager.record();
        match &self.segmentation {
            Segmentation::Pages(units) => assemble_pages(units, &record.completed, &record.seams),
            Segmentation::Windows(document) => {
                let translations: Vec<String> = document
                    .units
                    .iter()
                    .map(|unit| match record.completed.get(&unit.sequence_index()) {
                        Some(result) => result.translated_text.clone(),
                        None => placeholder(unit),
                    })
                    .collect();
                let thresholds = MatchThresholds::from(&self.window_config);
                let (text, methods) = assemble_windows(&translations, &document.specs, &thresholds);
                for (index, method) in methods.iter().enumerate() {
                    if *method == OverlapMatch::Proportional {
                        self.warnings.push(format!(
                            "Windows {} and {}: overlap not found in translation, trimmed proportionally",
                            index,
                            index + 1
                        ));
                    }
                }
                text
            }
        }
    }

    fn report(&mut self, status: JobStatus) -> JobReport {
        let text = self.assemble();
        let record = self.manager.record();
        let skipped = (0..record.total_units)
            .filter(|i| !record.completed.contains_key(i) && !record.failed.contains_key(i))
            .collect();
        JobReport {
            job_id: record.job_id.clone(),
            status,
            text,
            total_units: record.total_units,
            completed: record.completed.keys().copied().collect(),
            failed: record.failed.clone(),
            skipped,
            tokens_used: record.ledger.tokens,
            cost: record.ledger.cost,
            warnings: self.warnings.clone(),
            elapsed: self.started.elapsed(),
        }
    }
}
