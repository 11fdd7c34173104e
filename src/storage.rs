//! Mollie API key storage in the OS credential store.
//!
//! On Windows this uses the Credential Manager (via the `keyring` crate),
//! on macOS Keychain, and on Linux the Secret Service API.

use keyring::Entry;
use tracing::{info, warn};

const SERVICE_NAME: &str = "mollie-pos-terminal";
const KEY_API_KEY: &str = "mollie_terminal_api_key";

/// Stored Mollie terminal API key. Returns `None` when the entry does not
/// exist or the keyring cannot be read.
pub fn get_api_key() -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, KEY_API_KEY) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) if !pw.trim().is_empty() => Some(pw),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(error = %e, "keyring: failed to read API key");
            None
        }
    }
}

/// Store the Mollie terminal API key.
pub fn set_api_key(api_key: &str) -> Result<(), String> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err("API key must not be empty".into());
    }
    let entry = Entry::new(SERVICE_NAME, KEY_API_KEY).map_err(|e| e.to_string())?;
    entry.set_password(api_key).map_err(|e| e.to_string())?;
    info!("Mollie API key stored in keyring");
    Ok(())
}

/// Delete the stored API key. Silently succeeds if there is none.
pub fn delete_api_key() -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, KEY_API_KEY).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => {
            info!("Mollie API key removed from keyring");
            Ok(())
        }
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}
