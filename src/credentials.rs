use crate::errors::{AppError, AppResult};

pub const ENV_API_KEY: &str = "PLAN_ENGINE_API_KEY";
const KEYRING_SERVICE: &str = "plan-engine";
const KEYRING_ACCOUNT: &str = "generation-api-key";

/// Generation API key storage backed by the OS keyring.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
    account: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }
}

impl CredentialStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account).map_err(|error| AppError::Io(error.to_string()))
    }

    pub fn save_api_key(&self, key: &str) -> AppResult<()> {
        if key.trim().is_empty() {
            return Err(AppError::Config("API key cannot be empty".to_string()));
        }
        self.entry()?
            .set_password(key.trim())
            .map_err(|error| AppError::Io(error.to_string()))
    }

    pub fn clear_api_key(&self) -> AppResult<()> {
        match self.entry()?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    pub fn has_api_key(&self) -> AppResult<bool> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(!value.trim().is_empty()),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    /// Environment first, then keyring. `None` leaves the generator unconfigured.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = std::env::var(ENV_API_KEY)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            return Some(key);
        }

        let entry = match self.entry() {
            Ok(entry) => entry,
            Err(error) => {
                tracing::debug!(error = %error, "keyring unavailable");
                return None;
            }
        };
        match entry.get_password() {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Ok(_) | Err(keyring::Error::NoEntry) => None,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read generation API key from keyring");
                None
            }
        }
    }
}
