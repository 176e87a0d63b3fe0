//! Fluent message builder.

use std::path::PathBuf;

use super::model::{Attachment, Field, Message, MessageOptions};
use crate::{Error, Result};

/// Builder for [`Message`].
///
/// Setters may be called in any order. `from`, `to`, `smtp_server` and
/// `smtp_port` are required by [`MessageBuilder::build`].
///
/// ```no_run
/// # fn main() -> postbox_core::Result<()> {
/// let message = postbox_core::MessageBuilder::new()
///     .from("a@example.com")
///     .to("b@example.com")
///     .smtp_server("smtp.example.com")
///     .smtp_port(587)
///     .use_starttls(true)
///     .subject("Quarterly numbers")
///     .attachment_named("/tmp/upload-8812", "report.pdf")?
///     .build()?;
/// # let _ = message;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Option<String>,
    smtp_server: Option<String>,
    smtp_port: Option<u16>,
    options: MessageOptions,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sender address.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Sets the recipient address(es).
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Sets the subject line.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.options.subject = subject.into();
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.options.body = body.into();
        self
    }

    /// Sets the SMTP server hostname.
    #[must_use]
    pub fn smtp_server(mut self, host: impl Into<String>) -> Self {
        self.smtp_server = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    #[must_use]
    pub const fn smtp_port(mut self, port: u16) -> Self {
        self.smtp_port = Some(port);
        self
    }

    /// Enables or disables STARTTLS.
    #[must_use]
    pub const fn use_starttls(mut self, enabled: bool) -> Self {
        self.options.use_starttls = enabled;
        self
    }

    /// Attaches a file under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAttachment`] if `path` is not a regular file.
    pub fn attachment(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.options.attachments.push(Attachment::new(path)?);
        Ok(self)
    }

    /// Attaches a file under a different name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAttachment`] if `path` is not a regular file
    /// or `file_name` is not a bare file name.
    pub fn attachment_named(
        mut self,
        path: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Result<Self> {
        self.options
            .attachments
            .push(Attachment::named(path, file_name)?);
        Ok(self)
    }

    /// Appends already validated attachments.
    #[must_use]
    pub fn attachments(mut self, attachments: impl IntoIterator<Item = Attachment>) -> Self {
        self.options.attachments.extend(attachments);
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredField`] naming the first required field
    /// that was never set.
    pub fn build(self) -> Result<Message> {
        let from = self.from.ok_or(Error::MissingRequiredField(Field::From))?;
        let to = self.to.ok_or(Error::MissingRequiredField(Field::To))?;
        let smtp_server = self
            .smtp_server
            .ok_or(Error::MissingRequiredField(Field::SmtpServer))?;
        let smtp_port = self
            .smtp_port
            .ok_or(Error::MissingRequiredField(Field::SmtpPort))?;

        Ok(Message::new(from, to, smtp_server, smtp_port, self.options))
    }
}
