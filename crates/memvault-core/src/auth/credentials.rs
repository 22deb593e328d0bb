use anyhow::{Context, Result};
use keyring::Entry;

use crate::config::APP_NAME;

const SERVICE_NAME: &str = APP_NAME;

pub struct CredentialStore;

impl CredentialStore {
    fn entry(user_id: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, user_id).context("Failed to create keyring entry")
    }

    /// Store an access token for a user in the OS keychain
    pub fn store_token(user_id: &str, token: &str) -> Result<()> {
        Self::entry(user_id)?
            .set_password(token)
            .context("Failed to store token in keychain")?;
        Ok(())
    }

    pub fn get_token(user_id: &str) -> Result<String> {
        Self::entry(user_id)?
            .get_password()
            .context("Failed to retrieve token from keychain")
    }

    /// Delete the stored token. A missing entry is not an error.
    pub fn delete(user_id: &str) -> Result<()> {
        match Self::entry(user_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }

    pub fn has_token(user_id: &str) -> bool {
        Self::entry(user_id)
            .and_then(|entry| Ok(entry.get_password()?))
            .is_ok()
    }
}
