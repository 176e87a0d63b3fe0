//! The delivery job.
//!
//! A [`DeliveryJob`] loads a persisted message, stages its attachments,
//! composes the payload and hands it to a [`MailTransport`]. Every run ends in
//! [`JobState::Succeeded`] or [`JobState::Failed`]; retrying is left to
//! whoever scheduled the job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::codec::{MailDataHandle, MessageCodec};
use crate::credentials::Credentials;
use crate::message::Message;
use crate::progress::{DeliveryProgress, NoopReporter, ProgressReporter};
use crate::transport::{MailTransport, Payload, SmtpSession};
use crate::{Error, Result, staging};

/// Input key holding the persisted message location.
pub const MAIL_DATA_KEY: &str = "mailData";
/// Input key holding the SMTP username.
pub const USERNAME_KEY: &str = "username";
/// Input key holding the SMTP password.
pub const PASSWORD_KEY: &str = "password";

/// Unique identifier for a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued, not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Message was handed to the server.
    Succeeded,
    /// Delivery failed; not retried.
    Failed,
}

impl JobState {
    /// Stable lowercase name, as stored in the job table.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// String key/value input handed to a job.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct JobInput {
    values: BTreeMap<String, String>,
}

impl JobInput {
    /// Input for delivering the message at `handle` with `credentials`.
    #[must_use]
    pub fn new(handle: &MailDataHandle, credentials: &Credentials) -> Self {
        Self::from_pairs([
            (MAIL_DATA_KEY, handle.to_string()),
            (USERNAME_KEY, credentials.username().to_string()),
            (PASSWORD_KEY, credentials.password().to_string()),
        ])
    }

    /// Builds input from arbitrary pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &'static str) -> Result<&str> {
        self.get(key).ok_or(Error::MissingJobInput(key))
    }
}

impl std::fmt::Debug for JobInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.values.iter().map(|(k, v)| {
                let shown = if k == PASSWORD_KEY { "<redacted>" } else { v.as_str() };
                (k, shown)
            }))
            .finish()
    }
}

/// Terminal result of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Message was sent.
    Succeeded,
    /// Delivery failed with the given reason.
    Failed(String),
}

impl JobOutcome {
    /// Terminal state matching this outcome.
    #[must_use]
    pub const fn state(&self) -> JobState {
        match self {
            Self::Succeeded => JobState::Succeeded,
            Self::Failed(_) => JobState::Failed,
        }
    }

    /// Failure reason, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Succeeded => None,
            Self::Failed(reason) => Some(reason),
        }
    }
}

/// Deferred delivery of one persisted message.
#[derive(Clone)]
pub struct DeliveryJob {
    codec: MessageCodec,
    staging_dir: PathBuf,
    transport: Arc<dyn MailTransport>,
    reporter: Arc<dyn ProgressReporter>,
    delete_on_success: bool,
}

impl DeliveryJob {
    /// Creates a job reading from `codec`'s outbox and staging renamed
    /// attachments in `staging_dir`.
    #[must_use]
    pub fn new(
        codec: MessageCodec,
        staging_dir: impl Into<PathBuf>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            codec,
            staging_dir: staging_dir.into(),
            transport,
            reporter: Arc::new(NoopReporter),
            delete_on_success: true,
        }
    }

    /// Uses `reporter` for progress events.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Whether the persisted message is removed after a successful send.
    #[must_use]
    pub const fn delete_on_success(mut self, delete: bool) -> Self {
        self.delete_on_success = delete;
        self
    }

    /// Staging directory used for renamed attachments.
    #[must_use]
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Codec used to load persisted messages.
    #[must_use]
    pub const fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    /// Runs the job to a terminal outcome. Failures are logged, not returned.
    pub async fn run(&self, id: JobId, input: &JobInput) -> JobOutcome {
        match self.execute(id, input).await {
            Ok(()) => {
                info!("Delivery job {id} succeeded");
                JobOutcome::Succeeded
            }
            Err(e) => {
                error!("Delivery job {id} failed: {e}");
                JobOutcome::Failed(e.to_string())
            }
        }
    }

    async fn execute(&self, id: JobId, input: &JobInput) -> Result<()> {
        let handle = MailDataHandle::new(input.require(MAIL_DATA_KEY)?);
        let credentials = Credentials::new(
            input.require(USERNAME_KEY)?,
            input.require(PASSWORD_KEY)?,
        );

        let message = self.codec.deserialize(&handle).await?;

        let progress = DeliveryProgress {
            job_id: id.to_string(),
            to: message.to().to_string(),
            subject: message.subject().to_string(),
        };
        self.report(&progress, None).await;
        let result = self.deliver(&message, &credentials).await;
        self.report(&progress, Some(result.is_ok())).await;
        result?;

        if self.delete_on_success
            && let Err(e) = self.codec.discard(&handle).await
        {
            warn!("Could not remove sent message {handle}: {e}");
        }

        Ok(())
    }

    /// Tells the reporter a job started (`None`) or finished. Reporters may
    /// block, so they run on the blocking pool.
    async fn report(&self, progress: &DeliveryProgress, finished: Option<bool>) {
        let reporter = Arc::clone(&self.reporter);
        let progress = progress.clone();

        let reported = tokio::task::spawn_blocking(move || match finished {
            None => reporter.started(&progress),
            Some(succeeded) => reporter.finished(&progress, succeeded),
        })
        .await;

        match reported {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{e}"),
            Err(e) => warn!("Progress reporter panicked: {e}"),
        }
    }

    async fn deliver(&self, message: &Message, credentials: &Credentials) -> Result<()> {
        let session = SmtpSession::for_message(message);
        let files = staging::resolve(&self.staging_dir, message.attachments()).await?;
        let payload = Payload::compose(message, files);

        info!(
            "Sending to {} via {}:{} ({} part(s))",
            payload.to,
            session.host,
            session.port,
            payload.parts.len()
        );
        self.transport
            .send(&session, credentials, &payload)
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::progress::ProgressError;

    #[test]
    fn test_state_round_trips_through_text() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert!("done".parse::<JobState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_input_uses_plain_keys() {
        let handle = MailDataHandle::new("/cache/mail-1.json");
        let input = JobInput::new(&handle, &Credentials::new("alice", "s3cret"));

        assert_eq!(input.get("mailData"), Some("/cache/mail-1.json"));
        assert_eq!(input.get("username"), Some("alice"));
        assert_eq!(input.get("password"), Some("s3cret"));
    }

    #[test]
    fn test_input_debug_hides_password() {
        let input = JobInput::from_pairs([(PASSWORD_KEY, "s3cret"), (USERNAME_KEY, "alice")]);
        let printed = format!("{input:?}");

        assert!(printed.contains("alice"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_job_id_parses() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn test_outcome_state() {
        assert_eq!(JobOutcome::Succeeded.state(), JobState::Succeeded);
        let failed = JobOutcome::Failed("boom".into());
        assert_eq!(failed.state(), JobState::Failed);
        assert_eq!(failed.error(), Some("boom"));
    }

    #[derive(Default)]
    struct ThreadRecorder {
        threads: std::sync::Mutex<Vec<std::thread::ThreadId>>,
    }

    impl ProgressReporter for ThreadRecorder {
        fn started(&self, _: &DeliveryProgress) -> std::result::Result<(), ProgressError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(())
        }

        fn finished(&self, _: &DeliveryProgress, _: bool) -> std::result::Result<(), ProgressError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(())
        }
    }

    struct AcceptAll;

    #[async_trait::async_trait]
    impl MailTransport for AcceptAll {
        async fn send(
            &self,
            _: &SmtpSession,
            _: &Credentials,
            _: &Payload,
        ) -> std::result::Result<(), crate::transport::TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reporter_runs_off_the_async_thread() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path().join("outbox"));
        let reporter = Arc::new(ThreadRecorder::default());
        let job = DeliveryJob::new(codec.clone(), dir.path().join("staging"), Arc::new(AcceptAll))
            .with_reporter(reporter.clone());

        let message = crate::message::MessageBuilder::new()
            .from("a@x.com")
            .to("b@x.com")
            .smtp_server("smtp.x.com")
            .smtp_port(25)
            .build()
            .unwrap();
        let handle = codec.serialize(&message).await.unwrap();
        let creds = Credentials::new("a@x.com", "pw");

        let outcome = job.run(JobId::new(), &JobInput::new(&handle, &creds)).await;
        assert_eq!(outcome, JobOutcome::Succeeded);

        let here = std::thread::current().id();
        let threads = reporter.threads.lock().unwrap();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|id| *id != here));
    }
}
