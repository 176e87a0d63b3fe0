//! On-disk persistence of messages awaiting delivery.
//!
//! Each message is written to its own JSON file inside an outbox directory.
//! The file carries a schema version tag so later releases can refuse, or
//! migrate, files written by earlier ones.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::message::Message;
use crate::{Error, Result};

/// Schema version written into every envelope.
pub const SCHEMA_VERSION: u32 = 1;

/// Location of a persisted message.
///
/// Travels to the delivery job as the `mailData` input string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailDataHandle(PathBuf);

impl MailDataHandle {
    /// Wraps a path to a persisted message.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Path of the persisted file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for MailDataHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<String> for MailDataHandle {
    fn from(path: String) -> Self {
        Self(PathBuf::from(path))
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    message: &'a Message,
}

#[derive(Deserialize)]
struct Envelope {
    version: u32,
    message: Message,
}

/// Reads and writes persisted messages in an outbox directory.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    outbox_dir: PathBuf,
}

impl MessageCodec {
    /// Creates a codec writing into `outbox_dir`.
    #[must_use]
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
        }
    }

    /// Directory persisted messages are written to.
    #[must_use]
    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }

    /// Persists a message under a fresh unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the outbox cannot be created or written, or if the
    /// message cannot be encoded.
    pub async fn serialize(&self, message: &Message) -> Result<MailDataHandle> {
        tokio::fs::create_dir_all(&self.outbox_dir).await?;

        let id = Uuid::new_v4();
        let path = self.outbox_dir.join(format!("mail-{id}.json"));
        let partial = self.outbox_dir.join(format!(".mail-{id}.json.part"));

        let envelope = EnvelopeRef {
            version: SCHEMA_VERSION,
            message,
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(|e| Error::Codec {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        // A crash mid-write must never leave a truncated file under the final name.
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &path).await?;

        debug!("Persisted message to {}", path.display());
        Ok(MailDataHandle(path))
    }

    /// Loads a persisted message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the file is unreadable, malformed, or
    /// written with an unknown schema version.
    pub async fn deserialize(&self, handle: &MailDataHandle) -> Result<Message> {
        let path = handle.path();
        let codec_error = |reason: String| Error::Codec {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| codec_error(e.to_string()))?;
        let envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|e| codec_error(e.to_string()))?;

        if envelope.version != SCHEMA_VERSION {
            return Err(codec_error(format!(
                "unsupported schema version {}",
                envelope.version
            )));
        }

        Ok(envelope.message)
    }

    /// Removes a persisted message. Missing files are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn discard(&self, handle: &MailDataHandle) -> Result<()> {
        match tokio::fs::remove_file(handle.path()).await {
            Ok(()) => {
                debug!("Discarded persisted message {handle}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::{Attachment, MessageBuilder};

    fn message_with(attachments: Vec<Attachment>) -> Message {
        MessageBuilder::new()
            .from("Alice <a@x.com>")
            .to("b@x.com, c@x.com")
            .subject("Grüße")
            .body("line one\nline two")
            .smtp_server("smtp.x.com")
            .smtp_port(465)
            .use_starttls(true)
            .attachments(attachments)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_without_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path().join("outbox"));
        let message = message_with(Vec::new());

        let handle = codec.serialize(&message).await.unwrap();
        assert!(handle.path().starts_with(codec.outbox_dir()));

        let loaded = codec.deserialize(&handle).await.unwrap();
        assert_eq!(loaded, message);
    }

    #[tokio::test]
    async fn test_round_trip_keeps_attachment_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut attachments = Vec::new();
        for name in ["c.txt", "a.txt", "b.txt"] {
            let path = dir.path().join(name);
            std::fs::write(&path, name).unwrap();
            attachments.push(Attachment::named(&path, format!("sent-{name}")).unwrap());
        }
        let codec = MessageCodec::new(dir.path().join("outbox"));
        let message = message_with(attachments);

        let handle = codec.serialize(&message).await.unwrap();
        let loaded = codec.deserialize(&handle).await.unwrap();

        assert_eq!(loaded, message);
        assert_eq!(loaded.attachments()[0].file_name(), "sent-c.txt");
    }

    #[tokio::test]
    async fn test_each_serialize_gets_unique_file() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path());
        let message = message_with(Vec::new());

        let first = codec.serialize(&message).await.unwrap();
        let second = codec.serialize(&message).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_envelope_is_versioned() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path());

        let handle = codec.serialize(&message_with(Vec::new())).await.unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(handle.path()).unwrap()).unwrap();

        assert_eq!(raw["version"], SCHEMA_VERSION);
        assert_eq!(raw["message"]["smtp_port"], 465);
    }

    #[tokio::test]
    async fn test_missing_file_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path());
        let handle = MailDataHandle::new(dir.path().join("missing.json"));

        let result = codec.deserialize(&handle).await;
        assert!(matches!(result, Err(Error::Codec { .. })));
    }

    #[tokio::test]
    async fn test_malformed_file_is_codec_error() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path());
        let path = dir.path().join("broken.json");
        std::fs::write(&path, br#"{"version":1,"message":{"from":"a"}}"#).unwrap();

        let result = codec.deserialize(&MailDataHandle::new(path)).await;
        assert!(matches!(result, Err(Error::Codec { .. })));
    }

    #[tokio::test]
    async fn test_unknown_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path());
        let handle = codec.serialize(&message_with(Vec::new())).await.unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(handle.path()).unwrap()).unwrap();
        raw["version"] = serde_json::json!(99);
        std::fs::write(handle.path(), serde_json::to_vec(&raw).unwrap()).unwrap();

        let err = codec.deserialize(&handle).await.unwrap_err();
        assert!(err.to_string().contains("unsupported schema version 99"));
    }

    #[tokio::test]
    async fn test_discard_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let codec = MessageCodec::new(dir.path());
        let handle = codec.serialize(&message_with(Vec::new())).await.unwrap();

        codec.discard(&handle).await.unwrap();
        assert!(!handle.path().exists());
        codec.discard(&handle).await.unwrap();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use proptest::prelude::*;

    use super::*;
    use crate::message::{Attachment, MessageOptions};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn round_trip_preserves_every_field(
            from in "\\PC{0,40}",
            to in "\\PC{0,40}",
            subject in "\\PC{0,60}",
            body in "\\PC{0,200}",
            host in "[a-z]{1,12}\\.[a-z]{2,4}",
            port in any::<u16>(),
            starttls in any::<bool>(),
            names in prop::collection::vec("[a-zA-Z0-9_.-]{1,16}", 0..5),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let attachments: Vec<Attachment> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let path = dir.path().join(format!("src-{i}"));
                    std::fs::write(&path, name).unwrap();
                    Attachment::named(&path, name.clone()).unwrap()
                })
                .collect();
            let message = Message::new(from, to, host, port, MessageOptions {
                subject,
                body,
                use_starttls: starttls,
                attachments,
            });

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let codec = MessageCodec::new(dir.path().join("outbox"));
            let loaded = runtime.block_on(async {
                let handle = codec.serialize(&message).await.unwrap();
                codec.deserialize(&handle).await.unwrap()
            });

            prop_assert_eq!(loaded, message);
        }
    }
}
