//! Retrying job queue.
//!
//! Actions are submitted without blocking and executed by a fixed pool of
//! workers. A failed attempt whose error is retryable moves to `RetryWait`;
//! a timer task re-enqueues it after the backoff delay. Terminal failures
//! go to the [`FailureSink`].

pub mod state_machine;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use birdnet_core::config::JobQueueSettings;
use birdnet_core::events::{EventBus, PipelineEvent};

use crate::action::{Action, ActionContext, ActionOutcome, SinkKind};
use crate::error::{ActionError, JobError, QueueError};

pub use state_machine::{validate_transition, JobState};

/// One action plus its attempt bookkeeping.
pub struct Job {
    id: Uuid,
    action: Arc<dyn Action>,
    attempt: u32,
    state: JobState,
    submitted_at: DateTime<Utc>,
}

impl Job {
    fn new(action: Arc<dyn Action>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            attempt: 0,
            state: JobState::Pending,
            submitted_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn sink(&self) -> SinkKind {
        self.action.sink()
    }

    fn transition(&mut self, to: JobState) -> Result<(), JobError> {
        validate_transition(self.state, to)?;
        self.state = to;
        Ok(())
    }
}

/// A job abandoned after its final attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub job_id: Uuid,
    pub sink: SinkKind,
    pub description: String,
    pub species: String,
    pub attempts: u32,
    pub error: String,
    pub retryable: bool,
    pub submitted_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

/// Receives terminal failures.
pub trait FailureSink: Send + Sync {
    fn report(&self, failure: &JobFailure);
}

/// Logs terminal failures at `error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn report(&self, failure: &JobFailure) {
        tracing::error!(
            job_id = %failure.job_id,
            sink = %failure.sink,
            species = %failure.species,
            attempts = failure.attempts,
            retryable = failure.retryable,
            error = %failure.error,
            "Action failed: {}",
            failure.description
        );
    }
}

/// Counters since the queue was started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub suppressed: u64,
    pub retried: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    suppressed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared by the queue handle, its workers and retry timers.
struct Shared {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    events: EventBus,
    failures: Arc<dyn FailureSink>,
    counters: Counters,
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    /// Mark a job as no longer pending.
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn set_state(&self, job: &mut Job, to: JobState) {
        if let Err(e) = job.transition(to) {
            tracing::error!(job_id = %job.id, error = %e, "Job state machine violated");
            job.state = to;
        }
    }

    fn cancel_job(&self, job: &mut Job) {
        self.set_state(job, JobState::Cancelled);
        bump(&self.counters.cancelled);
        tracing::debug!(
            job_id = %job.id,
            sink = %job.sink(),
            attempt = job.attempt,
            "Job cancelled"
        );
        self.finish();
    }

    async fn run(self: &Arc<Self>, mut job: Job) {
        if self.cancel.is_cancelled() {
            self.cancel_job(&mut job);
            return;
        }

        self.set_state(&mut job, JobState::Dispatching);
        job.attempt += 1;
        let ctx = ActionContext::new(self.cancel.child_token(), job.attempt);
        let sink = job.sink();

        let result = job.action.execute(&ctx).await;
        match result {
            Ok(ActionOutcome::Dispatched) => {
                self.set_state(&mut job, JobState::Succeeded);
                bump(&self.counters.succeeded);
                self.events.publish(PipelineEvent::DispatchSucceeded {
                    job_id: job.id,
                    sink: sink.to_string(),
                    species: job.action.note().common_name().to_string(),
                    attempt: job.attempt,
                    timestamp: Utc::now(),
                });
                self.finish();
            }
            Ok(ActionOutcome::Suppressed(reason)) => {
                self.set_state(&mut job, JobState::Suppressed);
                bump(&self.counters.suppressed);
                self.events.publish(PipelineEvent::ActionSuppressed {
                    job_id: job.id,
                    sink: sink.to_string(),
                    species: job.action.note().common_name().to_string(),
                    reason,
                    timestamp: Utc::now(),
                });
                self.finish();
            }
            Err(e) if e.is_cancellation() || self.cancel.is_cancelled() => {
                self.cancel_job(&mut job);
            }
            Err(e)
                if e.is_retryable()
                    && job.action.retry_config().allows_retry_after(job.attempt) =>
            {
                self.schedule_retry(job, e);
            }
            Err(e) => self.fail(job, e),
        }
    }

    fn schedule_retry(self: &Arc<Self>, mut job: Job, error: ActionError) {
        let delay = job.action.retry_config().delay_for(job.attempt);
        self.set_state(&mut job, JobState::RetryWait);
        bump(&self.counters.retried);

        tracing::warn!(
            job_id = %job.id,
            sink = %job.sink(),
            attempt = job.attempt,
            max_attempts = job.action.retry_config().max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Action failed, retrying after backoff"
        );
        self.events.publish(PipelineEvent::RetryScheduled {
            job_id: job.id,
            sink: job.sink().to_string(),
            attempt: job.attempt,
            delay_ms: delay.as_millis() as u64,
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => {
                    shared.cancel_job(&mut job);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            shared.set_state(&mut job, JobState::Pending);
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => shared.cancel_job(&mut job),
                permit = shared.tx.reserve() => match permit {
                    Ok(permit) => permit.send(job),
                    Err(_) => shared.cancel_job(&mut job),
                },
            }
        });
    }

    fn fail(&self, mut job: Job, error: ActionError) {
        self.set_state(&mut job, JobState::Failed);
        bump(&self.counters.failed);

        let failure = JobFailure {
            job_id: job.id,
            sink: job.sink(),
            description: job.action.describe(),
            species: job.action.note().common_name().to_string(),
            attempts: job.attempt,
            error: error.to_string(),
            retryable: error.is_retryable(),
            submitted_at: job.submitted_at,
            failed_at: Utc::now(),
        };
        self.events.publish(PipelineEvent::DispatchFailed {
            job_id: failure.job_id,
            sink: failure.sink.to_string(),
            species: failure.species.clone(),
            attempts: failure.attempts,
            error: failure.error.clone(),
            retryable: failure.retryable,
            timestamp: failure.failed_at,
        });
        self.failures.report(&failure);
        self.finish();
    }

    /// Report a job that never entered the queue.
    fn reject(&self, job: Job, error: &QueueError) {
        bump(&self.counters.rejected);
        let failure = JobFailure {
            job_id: job.id,
            sink: job.sink(),
            description: job.action.describe(),
            species: job.action.note().common_name().to_string(),
            attempts: 0,
            error: error.to_string(),
            retryable: false,
            submitted_at: job.submitted_at,
            failed_at: Utc::now(),
        };
        tracing::warn!(
            job_id = %failure.job_id,
            sink = %failure.sink,
            error = %error,
            "Action rejected by job queue: {}",
            failure.description
        );
        self.failures.report(&failure);
    }
}

/// Bounded, multi-worker job queue with per-action retry.
pub struct JobQueue {
    shared: Arc<Shared>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
}

impl JobQueue {
    /// Start the worker pool with the default [`LogFailureSink`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(settings: &JobQueueSettings, events: EventBus) -> Self {
        Self::with_failure_sink(settings, events, Arc::new(LogFailureSink))
    }

    pub fn with_failure_sink(
        settings: &JobQueueSettings,
        events: EventBus,
        failures: Arc<dyn FailureSink>,
    ) -> Self {
        let capacity = settings.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(Shared {
            tx,
            cancel: CancellationToken::new(),
            events,
            failures,
            counters: Counters::default(),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..settings.workers.max(1))
            .map(|id| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                tokio::spawn(async move { worker_loop(id, shared, rx).await })
            })
            .collect();

        tracing::info!(
            workers = settings.workers.max(1),
            capacity,
            "Job queue started"
        );

        Self {
            shared,
            rx,
            workers: std::sync::Mutex::new(workers),
            capacity,
        }
    }

    /// Enqueue an action without waiting for it to run.
    ///
    /// A full or closed queue rejects the action immediately; the rejection
    /// is reported to the failure sink.
    pub fn submit(&self, action: Arc<dyn Action>) -> Result<Uuid, QueueError> {
        let job = Job::new(action);
        let id = job.id;

        if self.shared.cancel.is_cancelled() {
            self.shared.reject(job, &QueueError::Closed);
            return Err(QueueError::Closed);
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        match self.shared.tx.try_send(job) {
            Ok(()) => {
                bump(&self.shared.counters.submitted);
                Ok(id)
            }
            Err(e) => {
                self.shared.finish();
                let (job, error) = match e {
                    mpsc::error::TrySendError::Full(job) => (
                        job,
                        QueueError::Full {
                            capacity: self.capacity,
                        },
                    ),
                    mpsc::error::TrySendError::Closed(job) => (job, QueueError::Closed),
                };
                self.shared.reject(job, &error);
                Err(error)
            }
        }
    }

    /// Enqueue an action, waiting for a free slot when the queue is full.
    ///
    /// Only shutdown rejects the action.
    pub async fn submit_wait(&self, action: Arc<dyn Action>) -> Result<Uuid, QueueError> {
        let job = Job::new(action);
        let id = job.id;

        if self.shared.cancel.is_cancelled() {
            self.shared.reject(job, &QueueError::Closed);
            return Err(QueueError::Closed);
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let permit = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => None,
            permit = self.shared.tx.reserve() => permit.ok(),
        };

        match permit {
            Some(permit) => {
                permit.send(job);
                bump(&self.shared.counters.submitted);
                Ok(id)
            }
            None => {
                self.shared.finish();
                self.shared.reject(job, &QueueError::Closed);
                Err(QueueError::Closed)
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            suppressed: c.suppressed.load(Ordering::Relaxed),
            retried: c.retried.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Jobs submitted but not yet terminal, including those waiting to retry.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolve once every submitted job has reached a terminal state.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Cancel in-flight attempts and pending retries, then join the workers.
    ///
    /// Jobs still queued are marked cancelled. Later submissions are rejected.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();

        let workers: Vec<_> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job queue worker panicked");
            }
        }

        // Retry timers may still hand a job to the channel while exiting.
        loop {
            {
                let mut rx = self.rx.lock().await;
                while let Ok(mut job) = rx.try_recv() {
                    self.shared.cancel_job(&mut job);
                }
            }
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                break;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }

        let stats = self.stats();
        tracing::info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            cancelled = stats.cancelled,
            "Job queue shut down"
        );
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
    tracing::debug!(worker = id, "Job queue worker started");
    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };

        match next {
            Some(job) => shared.run(job).await,
            None => break,
        }
    }
    tracing::debug!(worker = id, "Job queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use birdnet_core::config::RetryConfig;
    use birdnet_core::events::SuppressReason;
    use birdnet_core::types::{Detection, Note, Source, SourceType, Species};
    use std::sync::atomic::AtomicU32;

    /// Fails with the scripted errors, then succeeds.
    struct ScriptedAction {
        note: Note,
        retry: RetryConfig,
        errors: std::sync::Mutex<Vec<ActionError>>,
        outcome: ActionOutcome,
        calls: AtomicU32,
        attempts_seen: std::sync::Mutex<Vec<u32>>,
        delay: Duration,
    }

    impl ScriptedAction {
        fn new(retry: RetryConfig, mut errors: Vec<ActionError>) -> Self {
            errors.reverse();
            let detection = Detection {
                species: Species::new("Cyanocitta cristata", "Blue Jay"),
                confidence: 0.9,
                clip_name: None,
                source: Source::new("test", SourceType::File),
                timestamp: Utc::now(),
            };
            Self {
                note: Note::from_detection(&detection, 0.0, 0.0),
                retry,
                errors: std::sync::Mutex::new(errors),
                outcome: ActionOutcome::Dispatched,
                calls: AtomicU32::new(0),
                attempts_seen: std::sync::Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Action for ScriptedAction {
        fn sink(&self) -> SinkKind {
            SinkKind::Mqtt
        }

        fn note(&self) -> &Note {
            &self.note
        }

        fn retry_config(&self) -> &RetryConfig {
            &self.retry
        }

        async fn execute(&self, ctx: &ActionContext) -> Result<ActionOutcome, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.attempts_seen.lock().unwrap().push(ctx.attempt());
            if !self.delay.is_zero() {
                tokio::select! {
                    _ = ctx.cancel_token().cancelled() => return Err(ActionError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            match self.errors.lock().unwrap().pop() {
                Some(err) => Err(err),
                None => Ok(self.outcome.clone()),
            }
        }
    }

    #[derive(Default)]
    struct CollectingFailureSink {
        failures: std::sync::Mutex<Vec<JobFailure>>,
    }

    impl FailureSink for CollectingFailureSink {
        fn report(&self, failure: &JobFailure) {
            self.failures.lock().unwrap().push(failure.clone());
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_retries,
            initial_delay_ms: 5,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
        }
    }

    fn queue_with_sink(workers: usize, capacity: usize) -> (JobQueue, Arc<CollectingFailureSink>) {
        let sink = Arc::new(CollectingFailureSink::default());
        let settings = JobQueueSettings { workers, capacity };
        let queue = JobQueue::with_failure_sink(&settings, EventBus::default(), sink.clone());
        (queue, sink)
    }

    async fn drain(queue: &JobQueue) {
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .expect("queue did not become idle");
    }

    #[tokio::test]
    async fn test_successful_job() {
        let (queue, failures) = queue_with_sink(2, 16);
        let action = Arc::new(ScriptedAction::new(fast_retry(3), vec![]));

        queue.submit(action.clone()).unwrap();
        drain(&queue).await;

        assert_eq!(action.calls(), 1);
        let stats = queue.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.pending, 0);
        assert!(failures.failures.lock().unwrap().is_empty());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failure_retries_to_single_success() {
        let (queue, failures) = queue_with_sink(2, 16);
        let action = Arc::new(ScriptedAction::new(
            fast_retry(3),
            vec![ActionError::SinkUnavailable("broker down".into())],
        ));

        queue.submit(action.clone()).unwrap();
        drain(&queue).await;

        assert_eq!(action.calls(), 2);
        assert_eq!(*action.attempts_seen.lock().unwrap(), vec![1, 2]);
        let stats = queue.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
        assert!(failures.failures.lock().unwrap().is_empty());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_failure() {
        let (queue, failures) = queue_with_sink(1, 16);
        let action = Arc::new(ScriptedAction::new(
            fast_retry(2),
            vec![
                ActionError::Timeout(10),
                ActionError::Timeout(10),
                ActionError::Timeout(10),
                ActionError::Timeout(10),
            ],
        ));

        queue.submit(action.clone()).unwrap();
        drain(&queue).await;

        assert_eq!(action.calls(), 3);
        let failures = failures.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 3);
        assert!(failures[0].retryable);
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let (queue, failures) = queue_with_sink(1, 16);
        let action = Arc::new(ScriptedAction::new(
            fast_retry(5),
            vec![ActionError::MissingDependency("mqtt client")],
        ));

        queue.submit(action.clone()).unwrap();
        drain(&queue).await;

        assert_eq!(action.calls(), 1);
        let failures = failures.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].retryable);
        assert_eq!(queue.stats().retried, 0);
    }

    #[tokio::test]
    async fn test_disabled_retry_fails_after_one_attempt() {
        let (queue, failures) = queue_with_sink(1, 16);
        let action = Arc::new(ScriptedAction::new(
            RetryConfig::disabled(),
            vec![ActionError::SinkUnavailable("down".into())],
        ));

        queue.submit(action.clone()).unwrap();
        drain(&queue).await;

        assert_eq!(action.calls(), 1);
        assert_eq!(failures.failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_suppressed_outcome_is_counted() {
        let (queue, _) = queue_with_sink(1, 16);
        let mut action = ScriptedAction::new(fast_retry(0), vec![]);
        action.outcome = ActionOutcome::Suppressed(SuppressReason::Cooldown);

        queue.submit(Arc::new(action)).unwrap();
        drain(&queue).await;

        let stats = queue.stats();
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.succeeded, 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let (queue, _) = queue_with_sink(1, 1);
        let mut slow = ScriptedAction::new(fast_retry(0), vec![]);
        slow.delay = Duration::from_secs(30);
        let slow = Arc::new(slow);

        // One job occupies the worker, one fills the channel.
        queue.submit(slow.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while slow.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        queue.submit(slow.clone()).unwrap();

        let err = queue.submit(slow.clone()).unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 1 });
        assert_eq!(queue.stats().rejected, 1);

        queue.shutdown().await;
        assert_eq!(queue.stats().cancelled, 2);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_rejected_submissions_reach_failure_sink() {
        let (queue, failures) = queue_with_sink(1, 1);
        let mut slow = ScriptedAction::new(fast_retry(0), vec![]);
        slow.delay = Duration::from_secs(30);
        let slow = Arc::new(slow);

        queue.submit(slow.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while slow.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        queue.submit(slow.clone()).unwrap();

        for _ in 0..3 {
            assert!(queue.submit(slow.clone()).is_err());
        }
        {
            let failures = failures.failures.lock().unwrap();
            assert_eq!(failures.len(), 3);
            for failure in failures.iter() {
                assert_eq!(failure.attempts, 0);
                assert!(!failure.retryable);
                assert_eq!(failure.error, "Job queue is full (1 jobs)");
                assert_eq!(failure.species, "Blue Jay");
            }
        }
        assert_eq!(queue.stats().rejected, 3);
        assert_eq!(queue.stats().submitted, 2);

        queue.shutdown().await;
        let action = Arc::new(ScriptedAction::new(fast_retry(0), vec![]));
        assert_eq!(queue.submit(action).unwrap_err(), QueueError::Closed);
        let failures = failures.failures.lock().unwrap();
        assert_eq!(failures.len(), 4);
        assert_eq!(failures[3].error, "Job queue is closed");
    }

    #[tokio::test]
    async fn test_submit_wait_applies_backpressure() {
        let (queue, failures) = queue_with_sink(1, 1);
        let mut slow = ScriptedAction::new(fast_retry(0), vec![]);
        slow.delay = Duration::from_millis(20);
        let slow = Arc::new(slow);

        for _ in 0..5 {
            tokio::time::timeout(Duration::from_secs(2), queue.submit_wait(slow.clone()))
                .await
                .expect("submit_wait should make progress")
                .unwrap();
        }
        drain(&queue).await;

        assert_eq!(slow.calls(), 5);
        let stats = queue.stats();
        assert_eq!(stats.submitted, 5);
        assert_eq!(stats.succeeded, 5);
        assert_eq!(stats.rejected, 0);
        assert!(failures.failures.lock().unwrap().is_empty());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_wait_is_released_by_shutdown() {
        let (queue, failures) = queue_with_sink(1, 1);
        let mut slow = ScriptedAction::new(fast_retry(0), vec![]);
        slow.delay = Duration::from_secs(30);
        let slow = Arc::new(slow);
        let queue = Arc::new(queue);

        queue.submit(slow.clone()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while slow.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        queue.submit(slow.clone()).unwrap();

        let waiting = {
            let queue = Arc::clone(&queue);
            let slow = slow.clone();
            tokio::spawn(async move { queue.submit_wait(slow).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        queue.shutdown().await;
        let result = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), QueueError::Closed);
        assert_eq!(failures.failures.lock().unwrap().len(), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_retries() {
        let (queue, failures) = queue_with_sink(1, 16);
        let retry = RetryConfig {
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            ..fast_retry(3)
        };
        let action = Arc::new(ScriptedAction::new(
            retry,
            vec![ActionError::SinkUnavailable("down".into())],
        ));
        let mut events = queue.shared.events.subscribe();

        queue.submit(action.clone()).unwrap();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, PipelineEvent::RetryScheduled { .. }) {
                break;
            }
        }

        tokio::time::timeout(Duration::from_secs(2), queue.shutdown())
            .await
            .expect("shutdown should not wait for the backoff");

        assert_eq!(action.calls(), 1);
        assert_eq!(queue.stats().cancelled, 1);
        assert!(failures.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let (queue, _) = queue_with_sink(1, 4);
        queue.shutdown().await;

        let action = Arc::new(ScriptedAction::new(fast_retry(0), vec![]));
        assert_eq!(queue.submit(action).unwrap_err(), QueueError::Closed);
        assert!(queue.is_shut_down());
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let events = EventBus::new(32);
        let mut rx = events.subscribe();
        let queue = JobQueue::new(&JobQueueSettings { workers: 1, capacity: 4 }, events);
        let action = Arc::new(ScriptedAction::new(
            fast_retry(1),
            vec![ActionError::Timeout(1)],
        ));

        queue.submit(action).unwrap();
        drain(&queue).await;

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["retry_scheduled", "dispatch_succeeded"]);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let (queue, _) = queue_with_sink(1, 4);
        drain(&queue).await;
        queue.shutdown().await;
    }
}
