//! Mail transport.
//!
//! [`MailTransport`] is the seam between a delivery job and the network. The
//! job hands it an [`SmtpSession`], the [`Credentials`] and a composed
//! [`Payload`]; [`SmtpTransport`] turns those into a MIME message and sends
//! it with lettre.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::{ContentType, To};
use lettre::message::{Attachment as MimeAttachment, Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::debug;

use crate::credentials::Credentials;
use crate::message::{Message, base_name};

/// Errors that can occur while composing or sending a message.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Sender or recipient could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// MIME message could not be assembled.
    #[error("Failed to build message: {0}")]
    Build(String),

    /// Attachment could not be read.
    #[error("Attachment I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection, authentication or protocol failure.
    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// Connection parameters for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSession {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Authenticate with the job's credentials.
    pub authenticate: bool,
    /// Upgrade the plaintext connection with STARTTLS before authenticating.
    pub starttls: bool,
}

impl SmtpSession {
    /// Session settings for delivering `message`. Authentication is always on.
    #[must_use]
    pub fn for_message(message: &Message) -> Self {
        Self {
            host: message.smtp_server().to_string(),
            port: message.smtp_port(),
            authenticate: true,
            starttls: message.use_starttls(),
        }
    }
}

/// One part of a composed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// Plain text body.
    Text(String),
    /// Files attached under their base names.
    Files(Vec<PathBuf>),
}

/// A message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Sender address.
    pub from: String,
    /// Recipient address(es).
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Text part first, then the attachment part when there are files.
    pub parts: Vec<Part>,
}

impl Payload {
    /// Composes the payload for `message` with its resolved attachment files.
    #[must_use]
    pub fn compose(message: &Message, files: Vec<PathBuf>) -> Self {
        let mut parts = vec![Part::Text(message.body().to_string())];
        if !files.is_empty() {
            parts.push(Part::Files(files));
        }

        Self {
            from: message.from().to_string(),
            to: message.to().to_string(),
            subject: message.subject().to_string(),
            parts,
        }
    }
}

/// Sends composed payloads.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    /// Sends `payload` over a session described by `session`.
    async fn send(
        &self,
        session: &SmtpSession,
        credentials: &Credentials,
        payload: &Payload,
    ) -> Result<(), TransportError>;
}

/// SMTP transport using lettre.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    timeout: Duration,
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl SmtpTransport {
    /// Creates a transport with the given connection timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn connect(
        &self,
        session: &SmtpSession,
        credentials: &Credentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let mut builder = if session.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&session.host)
                .map_err(|e| TransportError::Smtp(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&session.host)
        };

        builder = builder.port(session.port).timeout(Some(self.timeout));

        if session.authenticate {
            builder = builder.credentials(SmtpCredentials::new(
                credentials.username().to_string(),
                credentials.password().to_string(),
            ));
        }

        Ok(builder.build())
    }
}

/// Builds the `multipart/mixed` MIME message for a payload.
///
/// # Errors
///
/// Returns an error if an address does not parse, an attachment cannot be
/// read, or the payload has no parts.
pub async fn build_message(payload: &Payload) -> Result<lettre::Message, TransportError> {
    let from: Mailbox = payload
        .from
        .parse()
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {e}", payload.from)))?;
    let to: Mailboxes = payload
        .to
        .parse()
        .map_err(|e| TransportError::InvalidAddress(format!("{}: {e}", payload.to)))?;

    let mut singleparts = Vec::new();
    for part in &payload.parts {
        match part {
            Part::Text(text) => singleparts.push(SinglePart::plain(text.clone())),
            Part::Files(files) => {
                for path in files {
                    singleparts.push(attachment_part(path).await?);
                }
            }
        }
    }

    let mut singleparts = singleparts.into_iter();
    let first = singleparts
        .next()
        .ok_or_else(|| TransportError::Build("payload has no parts".into()))?;
    let multipart = singleparts.fold(MultiPart::mixed().singlepart(first), MultiPart::singlepart);

    lettre::Message::builder()
        .from(from)
        .header(To::from(to))
        .subject(payload.subject.clone())
        .multipart(multipart)
        .map_err(|e| TransportError::Build(e.to_string()))
}

async fn attachment_part(path: &std::path::Path) -> Result<SinglePart, TransportError> {
    let bytes = tokio::fs::read(path).await?;
    let name = base_name(path)
        .ok_or_else(|| TransportError::Build(format!("{} has no file name", path.display())))?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type =
        ContentType::parse(mime.essence_str()).map_err(|e| TransportError::Build(e.to_string()))?;

    Ok(MimeAttachment::new(name).body(bytes, content_type))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(
        &self,
        session: &SmtpSession,
        credentials: &Credentials,
        payload: &Payload,
    ) -> Result<(), TransportError> {
        let message = build_message(payload).await?;
        let transport = self.connect(session, credentials)?;

        debug!(
            "Connecting to {}:{} (starttls: {})",
            session.host, session.port, session.starttls
        );
        transport
            .send(message)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from("a@x.com")
            .to("b@x.com")
            .smtp_server("smtp.x.com")
            .smtp_port(587)
            .subject("Hi")
            .body("Hello")
    }

    #[test]
    fn test_session_always_authenticates() {
        let message = base().use_starttls(true).build().unwrap();
        let session = SmtpSession::for_message(&message);

        assert_eq!(
            session,
            SmtpSession {
                host: "smtp.x.com".into(),
                port: 587,
                authenticate: true,
                starttls: true,
            }
        );
    }

    #[test]
    fn test_compose_without_files_has_single_part() {
        let message = base().build().unwrap();
        let payload = Payload::compose(&message, Vec::new());

        assert_eq!(payload.parts, [Part::Text("Hello".into())]);
        assert_eq!(payload.subject, "Hi");
    }

    #[test]
    fn test_compose_with_files_adds_one_part() {
        let message = base().build().unwrap();
        let files = vec![PathBuf::from("/s/a.txt"), PathBuf::from("/s/b.txt")];
        let payload = Payload::compose(&message, files.clone());

        assert_eq!(payload.parts.len(), 2);
        assert_eq!(payload.parts[1], Part::Files(files));
    }

    #[tokio::test]
    async fn test_build_message_attaches_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();

        let message = base().build().unwrap();
        let payload = Payload::compose(&message, vec![file]);
        let mime = build_message(&payload).await.unwrap();
        let raw = String::from_utf8_lossy(&mime.formatted()).into_owned();

        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("Subject: Hi"));
        assert!(raw.contains("Hello"));
        assert!(raw.contains("filename=\"report.pdf\""));
        assert!(raw.contains("application/pdf"));
    }

    #[tokio::test]
    async fn test_build_message_accepts_recipient_list() {
        let payload = Payload {
            from: "Alice <a@x.com>".into(),
            to: "b@x.com, Carol <c@x.com>".into(),
            subject: String::new(),
            parts: vec![Part::Text(String::new())],
        };

        let mime = build_message(&payload).await.unwrap();
        let raw = String::from_utf8_lossy(&mime.formatted()).into_owned();
        assert!(raw.contains("c@x.com"));
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_address() {
        let payload = Payload {
            from: "not an address".into(),
            to: "b@x.com".into(),
            subject: String::new(),
            parts: vec![Part::Text(String::new())],
        };

        let result = build_message(&payload).await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_build_message_missing_attachment() {
        let payload = Payload {
            from: "a@x.com".into(),
            to: "b@x.com".into(),
            subject: String::new(),
            parts: vec![
                Part::Text(String::new()),
                Part::Files(vec![PathBuf::from("/definitely/not/here.txt")]),
            ],
        };

        let result = build_message(&payload).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
