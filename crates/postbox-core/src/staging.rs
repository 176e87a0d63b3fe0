//! Attachment staging.
//!
//! Attachments whose presented name differs from the source file name are
//! copied into a private staging directory under the requested name, so the
//! transport can attach them by path. The directory only ever holds the
//! files of the job currently in flight.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Result;
use crate::message::{Attachment, is_plain_file_name};

/// Resolves attachments to the files that should be attached.
///
/// Clears `staging_dir` first, then returns one path per attachment in input
/// order: the source path itself when the attachment is not renamed, or a
/// copy inside `staging_dir` named after [`Attachment::file_name`].
///
/// Not safe to run concurrently against the same directory.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the staging directory cannot be prepared
/// or a source file cannot be read or copied.
pub async fn resolve(staging_dir: &Path, attachments: &[Attachment]) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(staging_dir).await?;
    clear(staging_dir).await?;

    let mut resolved = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let source = attachment.source_path();

        // Surfaces a missing source even when no copy is needed.
        let meta = tokio::fs::metadata(source).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", source.display()),
            )
            .into());
        }

        if !attachment.is_renamed() {
            resolved.push(source.to_path_buf());
            continue;
        }

        let name = attachment.file_name();
        if !is_plain_file_name(name) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("attachment name {name:?} is not a bare file name"),
            )
            .into());
        }

        let target = staging_dir.join(name);
        tokio::fs::copy(source, &target).await?;
        debug!("Staged {} as {}", source.display(), target.display());
        resolved.push(target);
    }

    Ok(resolved)
}

/// Removes every entry inside `dir`, keeping `dir` itself.
async fn clear(dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        debug!("Removed stale staging entry {}", path.display());
    }
    Ok(())
}
