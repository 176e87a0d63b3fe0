//! Error types for the core library.

use std::path::PathBuf;

use thiserror::Error;

use crate::credentials::CredentialError;
use crate::job::JobId;
use crate::message::Field;
use crate::transport::TransportError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A mandatory message field was never set.
    #[error("Missing required field: {0}")]
    MissingRequiredField(Field),

    /// Attachment source is not a regular file, or its name is not a bare
    /// file name.
    #[error("Invalid attachment: {}", .0.display())]
    InvalidAttachment(PathBuf),

    /// Persisted message is unreadable or malformed.
    #[error("Codec error for {}: {reason}", path.display())]
    Codec {
        /// Location of the persisted message.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mail transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A job was started without one of its input keys.
    #[error("Missing job input: {0}")]
    MissingJobInput(&'static str),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Expedited queue is full and fallback is disabled.
    #[error("Expedited quota exhausted")]
    QuotaExceeded,

    /// The worker is no longer accepting jobs.
    #[error("Scheduler is shut down")]
    SchedulerClosed,

    /// No job with this ID was ever scheduled.
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    /// A stored job row could not be decoded.
    #[error("Corrupt job record: {0}")]
    CorruptRecord(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
