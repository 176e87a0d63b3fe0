//! The deferred send pipeline.
//!
//! [`Outbox::send`] persists a message and schedules its delivery in one
//! call, returning as soon as the job is queued.

use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::MessageCodec;
use crate::config::Settings;
use crate::credentials::Credentials;
use crate::job::{DeliveryJob, JobId};
use crate::message::Message;
use crate::progress::ProgressReporter;
use crate::scheduler::{JobScheduler, WorkerScheduler};
use crate::store::JobStore;
use crate::transport::MailTransport;
use crate::{Error, Result};

/// Persists messages and hands them to a [`JobScheduler`].
pub struct Outbox<S> {
    codec: MessageCodec,
    scheduler: S,
}

impl<S: JobScheduler> Outbox<S> {
    /// Creates an outbox writing through `codec` and scheduling on `scheduler`.
    #[must_use]
    pub const fn new(codec: MessageCodec, scheduler: S) -> Self {
        Self { codec, scheduler }
    }

    /// The underlying scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// Persists `message` and schedules its delivery.
    ///
    /// The persisted file is removed again if scheduling fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be persisted or scheduled.
    pub async fn send(&self, message: &Message, credentials: Credentials) -> Result<JobId> {
        let handle = self.codec.serialize(message).await?;

        match self.scheduler.enqueue(handle.clone(), credentials).await {
            Ok(id) => {
                info!("Scheduled delivery job {id} to {}", message.to());
                Ok(id)
            }
            Err(e) => {
                if let Err(cleanup) = self.codec.discard(&handle).await {
                    warn!("Could not remove unscheduled message {handle}: {cleanup}");
                }
                Err(e)
            }
        }
    }
}

impl Outbox<WorkerScheduler> {
    /// Opens the job store and starts a worker, all laid out per `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the job database cannot be opened.
    pub async fn start(
        settings: &Settings,
        transport: Arc<dyn MailTransport>,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Result<Self> {
        if let Some(parent) = settings.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let database_path = settings
            .database_path
            .to_str()
            .ok_or_else(|| Error::Config("database path is not valid UTF-8".into()))?;
        let store = JobStore::new(database_path).await?;

        let codec = MessageCodec::new(&settings.outbox_dir);
        let job = DeliveryJob::new(codec.clone(), &settings.staging_dir, transport)
            .with_reporter(reporter)
            .delete_on_success(settings.delete_on_success);
        let scheduler = WorkerScheduler::start(job, store, settings.scheduler());

        Ok(Self::new(codec, scheduler))
    }

    /// Stops the worker after it drained its queues.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
    }
}
