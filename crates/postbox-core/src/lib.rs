//! # postbox-core
//!
//! Durable deferred email delivery.
//!
//! This crate provides:
//! - Message building with required-field validation
//! - Versioned on-disk persistence of messages awaiting delivery
//! - Attachment staging under presented file names
//! - A delivery job that sends over SMTP (lettre)
//! - A background scheduler with an expedited queue and job status in `SQLite`
//! - Secure SMTP password storage (system keyring)
//!
//! Flow: [`MessageBuilder`] -> [`Message`] -> [`MessageCodec`] (write) ->
//! [`JobScheduler`] (enqueue) -> later, [`DeliveryJob`] (read, stage, send).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod credentials;
mod error;
pub mod job;
pub mod message;
pub mod outbox;
pub mod progress;
pub mod scheduler;
pub mod staging;
pub mod store;
pub mod transport;

pub use codec::{MailDataHandle, MessageCodec};
pub use config::Settings;
pub use credentials::{CredentialError, CredentialResult, Credentials};
pub use error::{Error, Result};
pub use job::{DeliveryJob, JobId, JobInput, JobOutcome, JobState};
pub use message::{Attachment, Field, Message, MessageBuilder, MessageOptions};
pub use outbox::Outbox;
pub use progress::{DeliveryProgress, NoopReporter, ProgressError, ProgressReporter};
pub use scheduler::{JobScheduler, SchedulerConfig, WorkerScheduler};
pub use store::{JobRecord, JobStore};
pub use transport::{MailTransport, Part, Payload, SmtpSession, SmtpTransport, TransportError};
