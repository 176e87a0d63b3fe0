//! Scheduling of delivery jobs.
//!
//! [`JobScheduler`] is the only thing callers need to hand a persisted message
//! off for background delivery. [`WorkerScheduler`] implements it with a
//! single tokio worker task fed by two queues:
//!
//! - an expedited queue, bounded by [`SchedulerConfig::expedited_capacity`];
//! - a normal queue, used when the expedited quota is exhausted.
//!
//! The worker always drains the expedited queue first and runs one job at a
//! time, so the staging directory is never shared by two running jobs.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::codec::MailDataHandle;
use crate::credentials::Credentials;
use crate::job::{DeliveryJob, JobId, JobInput, JobState};
use crate::store::{JobRecord, JobStore};
use crate::{Error, Result};

/// Hands delivery jobs to a background executor.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedules delivery of the message at `handle`. Returns without waiting
    /// for the job to run.
    async fn enqueue(&self, handle: MailDataHandle, credentials: Credentials) -> Result<JobId>;
}

/// Tuning for [`WorkerScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Jobs that may wait in the expedited queue at once.
    pub expedited_capacity: usize,
    /// Queue as normal work when the expedited queue is full, instead of
    /// rejecting the job.
    pub fallback_to_normal: bool,
    /// How often [`WorkerScheduler::wait`] polls the job store.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            expedited_capacity: 8,
            fallback_to_normal: true,
            poll_interval: Duration::from_millis(250),
        }
    }
}

struct QueuedJob {
    id: JobId,
    input: JobInput,
}

/// [`JobScheduler`] backed by a tokio worker task and a [`JobStore`].
pub struct WorkerScheduler {
    store: JobStore,
    config: SchedulerConfig,
    expedited_tx: mpsc::Sender<QueuedJob>,
    normal_tx: mpsc::UnboundedSender<QueuedJob>,
    worker: JoinHandle<()>,
    /// Jobs this scheduler has already handed to its worker.
    submitted: Mutex<HashSet<JobId>>,
}

impl WorkerScheduler {
    /// Spawns the worker task. Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(job: DeliveryJob, store: JobStore, config: SchedulerConfig) -> Self {
        let (expedited_tx, expedited_rx) = mpsc::channel(config.expedited_capacity.max(1));
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(work(job, store.clone(), expedited_rx, normal_rx));
        info!("Delivery worker running");

        Self {
            store,
            config,
            expedited_tx,
            normal_tx,
            worker,
            submitted: Mutex::new(HashSet::new()),
        }
    }

    /// Current record of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if the job store cannot be read.
    pub async fn status(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.store.get(id).await
    }

    /// Polls until the job reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownJob`] if the job was never scheduled, or an
    /// error if the job store cannot be read.
    pub async fn wait(&self, id: JobId) -> Result<JobRecord> {
        loop {
            let record = self.store.get(id).await?.ok_or(Error::UnknownJob(id))?;
            if record.state.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Re-submits jobs a previous process left pending or running.
    ///
    /// Jobs already submitted through this scheduler are skipped, so calling
    /// it again or after [`JobScheduler::enqueue`] never queues a job twice.
    /// Jobs whose persisted message no longer exists are marked failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job store cannot be read or updated.
    pub async fn resume(&self, credentials: &Credentials) -> Result<Vec<JobId>> {
        let mut resumed = Vec::new();

        for record in self.store.unfinished().await? {
            if self.was_submitted(record.id) {
                debug!("Job {} is already queued here, not resuming", record.id);
                continue;
            }

            let exists = tokio::fs::try_exists(record.mail_data.path())
                .await
                .unwrap_or(false);
            if !exists {
                warn!("Job {} lost its persisted message, marking failed", record.id);
                self.store
                    .set_state(record.id, JobState::Failed, Some("persisted message missing"))
                    .await?;
                continue;
            }

            self.store
                .set_state(record.id, JobState::Pending, None)
                .await?;
            let input = JobInput::new(&record.mail_data, credentials);
            self.submit(QueuedJob {
                id: record.id,
                input,
            })
            .await?;
            resumed.push(record.id);
        }

        if !resumed.is_empty() {
            info!("Resumed {} unfinished job(s)", resumed.len());
        }
        Ok(resumed)
    }

    /// Stops accepting jobs and waits for the worker to drain its queues.
    pub async fn shutdown(self) {
        let Self {
            expedited_tx,
            normal_tx,
            worker,
            ..
        } = self;
        drop(expedited_tx);
        drop(normal_tx);

        if let Err(e) = worker.await {
            error!("Delivery worker panicked: {e}");
        }
    }

    fn was_submitted(&self, id: JobId) -> bool {
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    async fn submit(&self, queued: QueuedJob) -> Result<JobId> {
        let id = queued.id;
        self.submitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);

        match self.expedited_tx.try_send(queued) {
            Ok(()) => {
                self.store.set_expedited(id, true).await?;
                debug!("Queued job {id} as expedited");
                Ok(id)
            }
            Err(TrySendError::Full(queued)) if self.config.fallback_to_normal => {
                info!("Expedited quota exhausted, queueing job {id} as normal work");
                self.store.set_expedited(id, false).await?;
                if self.normal_tx.send(queued).is_err() {
                    return self.reject(id, Error::SchedulerClosed).await;
                }
                Ok(id)
            }
            Err(TrySendError::Full(_)) => self.reject(id, Error::QuotaExceeded).await,
            Err(TrySendError::Closed(_)) => self.reject(id, Error::SchedulerClosed).await,
        }
    }

    async fn reject(&self, id: JobId, reason: Error) -> Result<JobId> {
        self.store
            .set_state(id, JobState::Failed, Some(&reason.to_string()))
            .await?;
        Err(reason)
    }
}

#[async_trait]
impl JobScheduler for WorkerScheduler {
    async fn enqueue(&self, handle: MailDataHandle, credentials: Credentials) -> Result<JobId> {
        let id = JobId::new();
        self.store
            .insert(&JobRecord::pending(id, handle.clone(), true))
            .await?;

        let input = JobInput::new(&handle, &credentials);
        self.submit(QueuedJob { id, input }).await
    }
}

async fn work(
    job: DeliveryJob,
    store: JobStore,
    mut expedited_rx: mpsc::Receiver<QueuedJob>,
    mut normal_rx: mpsc::UnboundedReceiver<QueuedJob>,
) {
    loop {
        let next = tokio::select! {
            biased;
            Some(queued) = expedited_rx.recv() => queued,
            Some(queued) = normal_rx.recv() => queued,
            else => break,
        };
        process(&job, &store, next).await;
    }

    info!("Delivery worker stopped");
}

async fn process(job: &DeliveryJob, store: &JobStore, queued: QueuedJob) {
    let QueuedJob { id, input } = queued;
    let span = tracing::info_span!("delivery", job_id = %id);

    async move {
        if let Err(e) = store.set_state(id, JobState::Running, None).await {
            error!("Could not mark job running: {e}");
        }

        let outcome = job.run(id, &input).await;

        if let Err(e) = store.set_state(id, outcome.state(), outcome.error()).await {
            error!("Could not record job outcome: {e}");
        }
    }
    .instrument(span)
    .await;
}
