//! Message data types.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mandatory message fields, named in [`Error::MissingRequiredField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Sender address.
    From,
    /// Recipient address.
    To,
    /// SMTP server hostname.
    SmtpServer,
    /// SMTP server port.
    SmtpPort,
}

impl Field {
    /// Get the field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::From => "from",
            Self::To => "to",
            Self::SmtpServer => "smtp_server",
            Self::SmtpPort => "smtp_port",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A file to send along with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    source_path: PathBuf,
    file_name: String,
}

impl Attachment {
    /// Creates an attachment presented under the source file's own name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAttachment`] if `path` is not a regular file.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let source_path = path.into();
        let file_name = base_name(&source_path)
            .ok_or_else(|| Error::InvalidAttachment(source_path.clone()))?;
        Self::named(source_path, file_name)
    }

    /// Creates an attachment presented under `file_name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAttachment`] if `path` is not a regular file
    /// or `file_name` is not a single path component.
    pub fn named(path: impl Into<PathBuf>, file_name: impl Into<String>) -> Result<Self> {
        let source_path = path.into();
        let file_name = file_name.into();
        if !is_plain_file_name(&file_name) {
            return Err(Error::InvalidAttachment(PathBuf::from(file_name)));
        }

        let is_file = std::fs::metadata(&source_path).is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(Error::InvalidAttachment(source_path));
        }

        Ok(Self {
            source_path,
            file_name,
        })
    }

    /// Location of the file to send.
    #[must_use]
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Name the file carries in the outgoing message.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns true if the presented name differs from the source file name.
    #[must_use]
    pub fn is_renamed(&self) -> bool {
        base_name(&self.source_path).as_deref() != Some(self.file_name.as_str())
    }
}

/// Returns true if `name` is exactly one normal path component.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(first)), None) if first == name
    )
}

/// Base name of a path as an owned string.
pub(crate) fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Optional message settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Upgrade the SMTP connection with STARTTLS before authenticating.
    pub use_starttls: bool,
    /// Files to attach, in order.
    pub attachments: Vec<Attachment>,
}

/// A fully specified email, ready to be persisted and delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    from: String,
    to: String,
    subject: String,
    body: String,
    smtp_server: String,
    smtp_port: u16,
    use_starttls: bool,
    attachments: Vec<Attachment>,
}

impl Message {
    /// Creates a message from its required fields and optional settings.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        smtp_server: impl Into<String>,
        smtp_port: u16,
        options: MessageOptions,
    ) -> Self {
        let MessageOptions {
            subject,
            body,
            use_starttls,
            attachments,
        } = options;

        Self {
            from: from.into(),
            to: to.into(),
            subject,
            body,
            smtp_server: smtp_server.into(),
            smtp_port,
            use_starttls,
            attachments,
        }
    }

    /// Sender address.
    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Recipient address(es).
    #[must_use]
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Subject line.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Plain text body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// SMTP server hostname.
    #[must_use]
    pub fn smtp_server(&self) -> &str {
        &self.smtp_server
    }

    /// SMTP server port.
    #[must_use]
    pub const fn smtp_port(&self) -> u16 {
        self.smtp_port
    }

    /// Whether the connection is upgraded with STARTTLS.
    #[must_use]
    pub const fn use_starttls(&self) -> bool {
        self.use_starttls
    }

    /// Attachments in the order they were added.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_defaults_to_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let attachment = Attachment::new(&path).unwrap();
        assert_eq!(attachment.file_name(), "report.pdf");
        assert_eq!(attachment.source_path(), path);
        assert!(!attachment.is_renamed());
    }

    #[test]
    fn test_attachment_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();

        let result = Attachment::new(dir.path());
        assert!(matches!(result, Err(Error::InvalidAttachment(p)) if p == dir.path()));
    }

    #[test]
    fn test_attachment_rejects_names_with_path_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload");
        std::fs::write(&path, "x").unwrap();

        for name in ["../x", "/abs/x", "a/b", "", ".", "..", "x/"] {
            let result = Attachment::named(&path, name);
            assert!(
                matches!(result, Err(Error::InvalidAttachment(_))),
                "accepted {name:?}"
            );
        }
        assert!(Attachment::named(&path, "report.final.pdf").is_ok());
    }

    #[test]
    fn test_attachment_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.txt");

        let result = Attachment::named(&path, "other.txt");
        assert!(matches!(result, Err(Error::InvalidAttachment(_))));
    }

    #[test]
    fn test_renamed_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tmp-1234");
        std::fs::write(&path, b"data").unwrap();

        let attachment = Attachment::named(&path, "report.pdf").unwrap();
        assert!(attachment.is_renamed());
    }

    #[test]
    fn test_field_names() {
        assert_eq!(Field::From.to_string(), "from");
        assert_eq!(Field::SmtpServer.name(), "smtp_server");
        assert_eq!(Field::SmtpPort.name(), "smtp_port");
    }
}
