//! Progress reporting while a delivery is in flight.

/// Error raised by a reporter. Never fails the delivery itself.
#[derive(Debug, thiserror::Error)]
#[error("Progress reporting failed: {0}")]
pub struct ProgressError(pub String);

/// What a reporter is told about a running delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryProgress {
    /// Job identifier, as text.
    pub job_id: String,
    /// Recipient address(es).
    pub to: String,
    /// Subject line.
    pub subject: String,
}

/// Receives advisory start/finish events from delivery jobs.
///
/// Calls happen on tokio's blocking pool, so implementations may do blocking
/// I/O such as talking to a notification daemon.
pub trait ProgressReporter: Send + Sync + 'static {
    /// Called before the message is sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the progress indicator cannot be shown.
    fn started(&self, progress: &DeliveryProgress) -> Result<(), ProgressError>;

    /// Called once the job reached a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the progress indicator cannot be dismissed.
    fn finished(&self, progress: &DeliveryProgress, succeeded: bool) -> Result<(), ProgressError>;
}

/// Reporter that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn started(&self, _progress: &DeliveryProgress) -> Result<(), ProgressError> {
        Ok(())
    }

    fn finished(&self, _progress: &DeliveryProgress, _succeeded: bool) -> Result<(), ProgressError> {
        Ok(())
    }
}
