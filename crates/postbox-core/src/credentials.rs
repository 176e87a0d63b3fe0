//! SMTP credentials and their secure storage.
//!
//! [`Credentials`] travel with a job in memory only. Passwords can be kept in
//! the platform's native credential storage between runs:
//! - Linux: Secret Service (GNOME Keyring, `KWallet`)
//! - macOS: Keychain
//! - Windows: Credential Manager

use keyring::Entry;
use tracing::{debug, warn};

/// Service name used for keyring entries.
const SERVICE_NAME: &str = "postbox";

/// Username and password used to authenticate with the SMTP server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Login name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Error type for credential operations.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Failed to access keyring.
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Result type for credential operations.
pub type CredentialResult<T> = std::result::Result<T, CredentialError>;

/// Generates the keyring entry key for a login on a server.
fn credential_key(username: &str, server: &str) -> String {
    format!("{SERVICE_NAME}_smtp_{username}@{server}")
}

/// Stores an SMTP password securely in the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn store_smtp_password(username: &str, server: &str, password: &str) -> CredentialResult<()> {
    let entry = Entry::new(SERVICE_NAME, &credential_key(username, server))?;
    entry.set_password(password)?;
    debug!("Stored SMTP password for {username} on {server}");
    Ok(())
}

/// Retrieves an SMTP password from the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails.
pub fn get_smtp_password(username: &str, server: &str) -> CredentialResult<Option<String>> {
    let entry = Entry::new(SERVICE_NAME, &credential_key(username, server))?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => {
            debug!("No SMTP password found for {username} on {server}");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Deletes an SMTP password from the system keyring.
///
/// # Errors
///
/// Returns an error if the keyring operation fails (except for missing entries).
pub fn delete_smtp_password(username: &str, server: &str) -> CredentialResult<()> {
    let entry = Entry::new(SERVICE_NAME, &credential_key(username, server))?;
    match entry.delete_credential() {
        Ok(()) => {
            debug!("Deleted SMTP password for {username} on {server}");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => {
            warn!("Failed to delete SMTP password: {e}");
            Err(e.into())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("alice", "hunter2");
        let printed = format!("{creds:?}");

        assert!(printed.contains("alice"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_key_includes_server() {
        assert_ne!(
            credential_key("alice", "smtp.a.com"),
            credential_key("alice", "smtp.b.com")
        );
    }

    // These tests interact with the actual system keyring.
    // Run manually with `cargo test -- --ignored`

    #[test]
    #[ignore = "Interacts with system keyring"]
    fn test_store_and_retrieve_smtp_password() {
        let (user, server) = ("postbox-test-user", "smtp.invalid");

        store_smtp_password(user, server, "test_smtp_password_12345").unwrap();
        let retrieved = get_smtp_password(user, server).unwrap();
        assert_eq!(retrieved.as_deref(), Some("test_smtp_password_12345"));

        delete_smtp_password(user, server).unwrap();
        assert_eq!(get_smtp_password(user, server).unwrap(), None);
    }
}
