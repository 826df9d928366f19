//! Optional OS-keychain storage of the login password.
//!
//! Holds only the password for "remember me" re-login. Session credentials
//! never go through the keychain - they live in session storage.

use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "terrascope";

pub struct PasswordVault;

impl PasswordVault {
    /// Remember the password for a username.
    pub fn store(username: &str, password: &str) -> Result<()> {
        Self::entry(username)?
            .set_password(password)
            .context("Failed to store password in keychain")
    }

    /// Look up the remembered password, if any.
    pub fn get(username: &str) -> Result<Option<String>> {
        match Self::entry(username)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read password from keychain"),
        }
    }

    /// Forget the remembered password. Absent entries are not an error.
    pub fn forget(username: &str) -> Result<()> {
        match Self::entry(username)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete password from keychain"),
        }
    }

    fn entry(username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")
    }
}
