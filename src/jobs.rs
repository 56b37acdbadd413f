//! Background jobs
//!
//! Content submission only enqueues work. A single worker drains a bounded
//! channel and runs classification and rollups off the request path. Every
//! job is safe to run more than once, so failures are simply re-enqueued.

use crate::analytics::AnalyticsAggregator;
use crate::classifier::{ClassificationHints, ContentClassifier};
use crate::coordinator::EscalationCoordinator;
use crate::error::CareError;
use crate::models::EscalationOutcome;
use crate::store::CareStore;
use crate::Result;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Delay before a failed job goes back on the queue.
const REQUEUE_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    ClassifyItem { item_id: Uuid },
    DailyRollup { day: NaiveDate },
}

#[derive(Debug, Clone)]
struct QueuedJob {
    job: Job,
    attempt: u32,
}

/// What a processed job produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Classified(EscalationOutcome),
    RolledUp { day: NaiveDate, users: usize },
}

/// Producer handle, cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<QueuedJob>,
}

pub struct JobReceiver {
    rx: mpsc::Receiver<QueuedJob>,
    // Weak so the channel still closes once every producer is gone
    retry: mpsc::WeakSender<QueuedJob>,
}

impl JobQueue {
    pub fn bounded(capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let retry = tx.downgrade();
        (Self { tx }, JobReceiver { rx, retry })
    }

    /// Jobs waiting in the channel, retries included.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub async fn enqueue(&self, job: Job) -> Result<()> {
        self.send(QueuedJob { job, attempt: 1 }).await
    }

    async fn send(&self, queued: QueuedJob) -> Result<()> {
        send(&self.tx, queued).await
    }
}

async fn send(tx: &mpsc::Sender<QueuedJob>, queued: QueuedJob) -> Result<()> {
    tx.send(queued)
        .await
        .map_err(|e| CareError::Queue(format!("job queue closed, dropped {:?}", e.0.job)))
}

pub struct Worker {
    store: Arc<dyn CareStore>,
    classifier: ContentClassifier,
    coordinator: Arc<EscalationCoordinator>,
    aggregator: Arc<AnalyticsAggregator>,
    max_attempts: u32,
}

impl Worker {
    pub fn new(
        store: Arc<dyn CareStore>,
        classifier: ContentClassifier,
        coordinator: Arc<EscalationCoordinator>,
        aggregator: Arc<AnalyticsAggregator>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            classifier,
            coordinator,
            aggregator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Drain the queue until every producer is dropped.
    pub fn spawn(self, receiver: JobReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    pub async fn run(self, mut receiver: JobReceiver) {
        info!(analyzer = self.classifier.analyzer_name(), "Job worker started");

        while let Some(queued) = receiver.rx.recv().await {
            let start = Instant::now();
            match self.process(&queued.job).await {
                Ok(outcome) => debug!(
                    job = ?queued.job,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    ?outcome,
                    "Job finished"
                ),
                Err(e) if should_retry(&e) && queued.attempt < self.max_attempts => {
                    warn!(job = ?queued.job, attempt = queued.attempt, "Job failed, re-enqueueing: {}", e);
                    let retry = QueuedJob {
                        job: queued.job,
                        attempt: queued.attempt + 1,
                    };
                    // The worker is the only consumer, so a blocking send on a
                    // full queue would stall it. Hand the retry off instead.
                    let Some(tx) = receiver.retry.upgrade() else {
                        error!(job = ?retry.job, "Queue closed, job dropped");
                        continue;
                    };
                    tokio::spawn(async move {
                        tokio::time::sleep(REQUEUE_DELAY).await;
                        if let Err(e) = send(&tx, retry).await {
                            error!("Failed to re-enqueue job: {}", e);
                        }
                    });
                }
                Err(e) => error!(job = ?queued.job, attempt = queued.attempt, "Job abandoned: {}", e),
            }
        }

        info!("Job worker stopped");
    }

    /// Run one job to completion.
    pub async fn process(&self, job: &Job) -> Result<JobOutcome> {
        match job {
            Job::ClassifyItem { item_id } => {
                let item = self
                    .store
                    .get_item(*item_id)
                    .await?
                    .ok_or_else(|| CareError::NotFound(format!("content item {}", item_id)))?;

                let hints = ClassificationHints::from_item(&item);
                let classification = self
                    .classifier
                    .classify_with_retry(&item.analysis_text(), &hints)
                    .await?;
                if let Some(e) = &classification.risk_error {
                    warn!(
                        item_id = %item.id,
                        risk = item.risk_level.as_str(),
                        "Risk unassessed after retries, keeping prior level: {}",
                        e
                    );
                }

                let outcome = self
                    .coordinator
                    .handle_classified_item(&item, &classification)
                    .await?;
                Ok(JobOutcome::Classified(outcome))
            }
            Job::DailyRollup { day } => {
                self.aggregator.rollup(*day).await?;
                let users = self.aggregator.rollup_all_users(*day).await?;
                Ok(JobOutcome::RolledUp {
                    day: *day,
                    users: users.len(),
                })
            }
        }
    }
}

fn should_retry(err: &CareError) -> bool {
    match err {
        CareError::NotFound(_) | CareError::InvalidInput(_) | CareError::InvalidTransition(_) => false,
        CareError::Classifier(e) => e.is_transient(),
        _ => true,
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Enqueue rollups every `interval`, starting one interval from now.
    /// Each tick rolls up today; the first tick after midnight also
    /// re-rolls the days since the previous tick so late data is counted.
    pub fn spawn_daily_rollup(queue: JobQueue, interval: Duration) -> JoinHandle<()> {
        Self::spawn_with_clock(queue, interval, || Utc::now().date_naive())
    }

    fn spawn_with_clock<F>(queue: JobQueue, interval: Duration, today: F) -> JoinHandle<()>
    where
        F: Fn() -> NaiveDate + Send + 'static,
    {
        let interval = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            let mut last: Option<NaiveDate> = None;
            loop {
                ticker.tick().await;
                let today = today();
                for day in rollup_days(last, today) {
                    if let Err(e) = queue.enqueue(Job::DailyRollup { day }).await {
                        warn!("Rollup scheduler stopping: {}", e);
                        return;
                    }
                }
                last = Some(today);
            }
        })
    }
}

/// Days a tick should roll up, oldest first. Rollups are idempotent upserts,
/// so repeating a day is harmless.
fn rollup_days(last: Option<NaiveDate>, today: NaiveDate) -> Vec<NaiveDate> {
    let Some(mut day) = last.filter(|last| *last < today) else {
        return vec![today];
    };
    let mut days = Vec::new();
    while day < today {
        days.push(day);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    days.push(today);
    days
}
