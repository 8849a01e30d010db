use arc_swap::ArcSwapOption;
use std::sync::Arc;

use crate::config::CatalystConfig;
use crate::error::{CatalystError, Result};

/// Bearer token slot shared by every client forked from the same config
///
/// Readers never block: the current token is swapped atomically when a
/// refresh completes. Refreshes themselves are serialized through
/// `refresh_lock` so concurrent 401s trigger a single token request.
pub struct TokenStore {
    current: ArcSwapOption<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    pub(crate) refresh_lock: tokio::sync::Mutex<()>,
}

impl TokenStore {
    /// Build the store from config, requiring either a token or a key pair
    pub fn from_config(config: &CatalystConfig) -> Result<Self> {
        if !config.has_credentials() {
            return Err(CatalystError::Config(
                "no credentials: set CATALYST_TOKEN or CATALYST_ACCESS_KEY and CATALYST_SECRET_KEY"
                    .to_string(),
            ));
        }

        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .map(Arc::new);

        Ok(Self {
            current: ArcSwapOption::new(token),
            access_key: config.access_key.clone().filter(|k| !k.is_empty()),
            secret_key: config.secret_key.clone().filter(|k| !k.is_empty()),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn current(&self) -> Option<Arc<String>> {
        self.current.load_full()
    }

    pub fn has_token(&self) -> bool {
        self.current.load().is_some()
    }

    pub fn set(&self, token: String) {
        self.current.store(Some(Arc::new(token)));
    }

    pub fn clear(&self) {
        self.current.store(None);
    }

    /// Access/secret pair, when a new token can be requested
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current();
        f.debug_struct("TokenStore")
            .field(
                "current",
                &current.as_deref().map(|t| crate::logging::SensitiveToken::new(t).to_string()),
            )
            .field("can_refresh", &self.credentials().is_some())
            .finish()
    }
}
