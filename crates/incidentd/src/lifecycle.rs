//! Incident run lifecycle.
//!
//! ```text
//! Pending -[trigger]-> Triggered -[complete]-> Succeeded
//!                          \------[fail]-----> Failed
//! ```
//!
//! Every operation re-reads the run from the store; nothing here caches run
//! state. Background completion is a handoff: `trigger` enqueues a job tagged
//! with the run id and the single `CompletionWorker` processes it. A report is
//! written at most once because the terminal transition is a conditional
//! update on `status = Triggered` and only its winner publishes the file.

use chrono::Utc;
use incident_shared::{
    IncidentError, IncidentReport, IncidentRun, LatestLogs, Result, RunStatus, Summary,
};
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::logs::LogAggregator;
use crate::reports::ReportStore;
use crate::shutdown::ShutdownListener;
use crate::store::RunStore;
use crate::summarizer::{build_prompt, Summarizer, SYSTEM_PROMPT};

// ============================================================================
// Completion handoff
// ============================================================================

/// Deferred completion of one run
#[derive(Debug, Clone, Copy)]
pub struct CompletionJob {
    pub run_id: Uuid,
    pub due: Instant,
}

#[derive(Debug, Clone)]
pub struct CompletionQueue {
    sender: mpsc::UnboundedSender<CompletionJob>,
    delay: Duration,
}

pub struct CompletionJobs {
    receiver: mpsc::UnboundedReceiver<CompletionJob>,
}

/// Queue/receiver pair; jobs become due `delay` after they are enqueued.
pub fn completion_channel(delay: Duration) -> (CompletionQueue, CompletionJobs) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        CompletionQueue { sender, delay },
        CompletionJobs { receiver },
    )
}

impl CompletionQueue {
    /// False when the worker is gone.
    pub fn enqueue(&self, run_id: Uuid) -> bool {
        let job = CompletionJob {
            run_id,
            due: Instant::now() + self.delay,
        };
        self.sender.send(job).is_ok()
    }
}

// ============================================================================
// Lifecycle manager
// ============================================================================

/// A report artifact ready for download
#[derive(Debug, Clone)]
pub struct ReportDownload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct LifecycleManager {
    store: Arc<RunStore>,
    reports: ReportStore,
    logs: Arc<LogAggregator>,
    summarizer: Arc<dyn Summarizer>,
    config: LifecycleConfig,
    min_summary_lines: usize,
    queue: CompletionQueue,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<RunStore>,
        reports: ReportStore,
        logs: Arc<LogAggregator>,
        summarizer: Arc<dyn Summarizer>,
        config: LifecycleConfig,
        min_summary_lines: usize,
        queue: CompletionQueue,
    ) -> Self {
        Self {
            store,
            reports,
            logs,
            summarizer,
            config,
            min_summary_lines,
            queue,
        }
    }

    /// Record a new run in `Triggered`, optionally scheduling its completion.
    ///
    /// The impacted service is a cosmetic label, never a dispatch target.
    pub async fn trigger(
        &self,
        scenario_name: &str,
        auto_complete: Option<bool>,
    ) -> Result<IncidentRun> {
        let scenario_name = scenario_name.trim();
        if scenario_name.is_empty() {
            return Err(IncidentError::InvalidInput(
                "scenario_name must not be empty".to_string(),
            ));
        }

        let impacted = self
            .config
            .impacted_services
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| {
                IncidentError::Misconfiguration("no impacted service candidates".to_string())
            })?;

        let run = IncidentRun::triggered(scenario_name, impacted);
        self.store.create(&run).await?;
        info!(
            "Run {} triggered: {} (impacted {})",
            run.id, run.scenario_name, run.logs.impacted_service
        );

        if auto_complete.unwrap_or(self.config.auto_complete) {
            if self.queue.enqueue(run.id) {
                info!("Run {} scheduled for completion", run.id);
            } else {
                warn!("Completion worker not running; run {} stays Triggered", run.id);
            }
        }
        Ok(run)
    }

    pub async fn get(&self, id: Uuid) -> Result<IncidentRun> {
        self.store.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<IncidentRun>> {
        self.store.list_all().await
    }

    /// Move a Triggered run to Succeeded with a log snapshot and a report.
    ///
    /// Completing a Succeeded run that has its report returns it unchanged.
    pub async fn complete(&self, id: Uuid) -> Result<IncidentRun> {
        let run = self.store.get(id).await?;
        if run.status != RunStatus::Triggered {
            return finished_run(run);
        }

        let timeline = self.logs.collect_latest(self.config.report_log_lines).await;

        let mut finished = run;
        finished.status = RunStatus::Succeeded;
        finished.ended_at = Some(Utc::now().max(finished.started_at));
        finished.logs.timeline = Some(timeline);
        finished.report_path = Some(self.reports.path_for(id).display().to_string());

        let staged = match self.reports.stage(&IncidentReport::from(&finished)).await {
            Ok(staged) => staged,
            Err(e) => {
                error!("Report for run {} not written: {}", id, e);
                // a concurrent completer may already own the run
                if let Err(fail_err) = self.fail(id, &format!("report not written: {}", e)).await {
                    warn!("Run {} not marked failed: {}", id, fail_err);
                }
                return Err(e);
            }
        };

        let won = match self.store.finish_if_triggered(&finished).await {
            Ok(won) => won,
            Err(e) => {
                self.reports.discard(staged).await;
                return Err(e);
            }
        };
        if !won {
            self.reports.discard(staged).await;
            info!("Run {} was finished concurrently, keeping existing result", id);
            return finished_run(self.store.get(id).await?);
        }

        match self.reports.commit(staged).await {
            Ok(path) => match self.store.get(id).await {
                // deleted between the transition and the rename
                Err(e) if e.is_not_found() => {
                    if let Err(remove_err) = self.reports.remove(&path).await {
                        warn!(
                            "Report {} of deleted run {} left behind: {}",
                            path.display(),
                            id,
                            remove_err
                        );
                    }
                    info!("Run {} was deleted during completion, report withdrawn", id);
                    Err(e)
                }
                Err(e) => Err(e),
                Ok(_) => {
                    info!("Run {} succeeded, report at {}", id, path.display());
                    Ok(finished)
                }
            },
            Err(e) => {
                error!("Report for run {} not published: {}", id, e);
                let mut failed = finished;
                failed.status = RunStatus::Failed;
                failed.report_path = None;
                failed.logs.failure_reason = Some(format!("report not published: {}", e));
                self.store.save(&failed).await?;
                Err(e)
            }
        }
    }

    /// Move a Triggered run to Failed. Failing a Failed run returns it unchanged.
    pub async fn fail(&self, id: Uuid, reason: &str) -> Result<IncidentRun> {
        let run = self.store.get(id).await?;
        if run.status != RunStatus::Triggered {
            return failed_run(run);
        }

        let mut failed = run;
        failed.status = RunStatus::Failed;
        failed.ended_at = Some(Utc::now().max(failed.started_at));
        failed.logs.failure_reason = Some(reason.to_string());

        if self.store.finish_if_triggered(&failed).await? {
            warn!("Run {} failed: {}", id, reason);
            Ok(failed)
        } else {
            failed_run(self.store.get(id).await?)
        }
    }

    /// Report bytes for download. The file is checked on disk, not just in the row.
    pub async fn report(&self, id: Uuid) -> Result<ReportDownload> {
        let run = self.store.get(id).await?;
        let path = run
            .report_path
            .as_deref()
            .ok_or_else(|| IncidentError::not_found(format!("Report for run '{}'", id)))?;
        let bytes = self.reports.read(Path::new(path)).await?;
        Ok(ReportDownload {
            file_name: format!("report_{}.json", id),
            bytes,
        })
    }

    /// Delete the run, then its report file.
    ///
    /// Row first: a completion publishing concurrently withdraws its file once
    /// it sees the row gone.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let run = self.store.get(id).await?;
        self.store.delete(id).await?;
        info!("Run {} deleted", id);

        let expected = self.reports.path_for(id);
        let mut paths = vec![expected.clone()];
        if let Some(stored) = run.report_path.as_deref().map(PathBuf::from) {
            if stored != expected {
                paths.push(stored);
            }
        }

        let mut removed = false;
        for path in &paths {
            removed |= self.reports.remove(path).await?;
        }
        if run.has_report() && !removed {
            warn!("Report for run {} was already gone", id);
        }
        Ok(())
    }

    pub async fn latest_logs(&self, max_lines: usize) -> LatestLogs {
        let timeline = self.logs.collect_latest(max_lines).await;
        LatestLogs::from(&timeline)
    }

    /// Root-cause summary of the latest logs.
    ///
    /// Too few non-empty lines returns the canned result without calling the summarizer.
    pub async fn summarize(&self, max_lines: usize) -> Result<Summary> {
        let timeline = self.logs.collect_latest(max_lines).await;
        let lines: Vec<String> = LogAggregator::flatten(&timeline)
            .into_iter()
            .filter(|line| !line.trim().is_empty())
            .collect();

        if lines.len() < self.min_summary_lines {
            info!(
                "Summary skipped: {} lines, need {}",
                lines.len(),
                self.min_summary_lines
            );
            return Ok(Summary::insufficient(lines.len()));
        }

        let prompt = build_prompt(&lines.join("\n"));
        let summary = self.summarizer.complete(SYSTEM_PROMPT, &prompt).await?;
        Ok(Summary::generated(summary, lines.len()))
    }
}

/// Result of completing a run that is no longer Triggered.
///
/// Only a Succeeded run with its report counts as completed.
fn finished_run(run: IncidentRun) -> Result<IncidentRun> {
    match run.status {
        RunStatus::Succeeded if run.has_report() => Ok(run),
        status => Err(IncidentError::not_found(format!(
            "Completable run '{}' (status {})",
            run.id, status
        ))),
    }
}

/// Result of failing a run that is no longer Triggered.
fn failed_run(run: IncidentRun) -> Result<IncidentRun> {
    match run.status {
        RunStatus::Failed => Ok(run),
        status => Err(IncidentError::InvalidInput(format!(
            "run '{}' is {} and cannot fail",
            run.id, status
        ))),
    }
}

// ============================================================================
// Completion worker
// ============================================================================

/// Single consumer of completion jobs.
pub struct CompletionWorker {
    manager: Arc<LifecycleManager>,
    jobs: CompletionJobs,
}

impl CompletionWorker {
    pub fn new(manager: Arc<LifecycleManager>, jobs: CompletionJobs) -> Self {
        Self { manager, jobs }
    }

    pub fn start(mut self, mut shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Completion worker started");
            loop {
                let job = tokio::select! {
                    job = self.jobs.receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                    _ = shutdown.wait() => break,
                };
                info!("Completion job received for run {}", job.run_id);

                tokio::select! {
                    _ = tokio::time::sleep_until(job.due) => {}
                    _ = shutdown.wait() => {
                        warn!(
                            "Completion of run {} dropped at shutdown; it stays Triggered",
                            job.run_id
                        );
                        break;
                    }
                }
                self.process(job).await;
            }

            let dropped = self.drain();
            for run_id in &dropped {
                warn!("Completion of run {} dropped at shutdown; it stays Triggered", run_id);
            }
            info!("Completion worker stopped");
        })
    }

    /// Ids of jobs still queued, removing them.
    fn drain(&mut self) -> Vec<Uuid> {
        let mut dropped = Vec::new();
        while let Ok(job) = self.jobs.receiver.try_recv() {
            dropped.push(job.run_id);
        }
        dropped
    }

    async fn process(&self, job: CompletionJob) {
        match self.manager.complete(job.run_id).await {
            Ok(run) => info!("Run {} completed in background ({})", run.id, run.status),
            // deleted or already failed in the meantime
            Err(e) if e.is_not_found() => info!("Run {} not completed: {}", job.run_id, e),
            Err(e) => {
                warn!("Background completion of run {} failed: {}", job.run_id, e);
                if let Err(fail_err) = self.manager.fail(job.run_id, &e.to_string()).await {
                    warn!("Could not mark run {} failed: {}", job.run_id, fail_err);
                }
            }
        }
    }
}
