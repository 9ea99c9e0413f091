use std::time::Duration;

/// Runtime policy shared by the manager and every connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Storage key of the persisted connection descriptor.
    pub storage_key: String,
    /// How long an injected wallet may take to hand out accounts before it is
    /// considered locked.
    pub unlock_timeout_ms: u64,
    /// Lifetime of an auth-server ephemeral identity.
    pub identity_ttl_ms: u64,
    /// Key prefix of everything the relay SDK caches in storage.
    pub relay_storage_prefix: String,
    pub rpc_timeout_ms: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            storage_key: "decentraland-connect-storage-key".to_owned(),
            unlock_timeout_ms: 60_000,
            identity_ttl_ms: 30 * 24 * 60 * 60 * 1000,
            relay_storage_prefix: "wc@2:".to_owned(),
            rpc_timeout_ms: 15_000,
        }
    }
}

impl ConnectConfig {
    /// Defaults overridden by `DAPP_CONNECT_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_string("DAPP_CONNECT_STORAGE_KEY") {
            cfg.storage_key = v;
        }
        if let Some(v) = env_u64("DAPP_CONNECT_UNLOCK_TIMEOUT_MS") {
            cfg.unlock_timeout_ms = v;
        }
        if let Some(v) = env_u64("DAPP_CONNECT_IDENTITY_TTL_MS") {
            cfg.identity_ttl_ms = v;
        }
        if let Some(v) = env_string("DAPP_CONNECT_RELAY_STORAGE_PREFIX") {
            cfg.relay_storage_prefix = v;
        }
        if let Some(v) = env_u64("DAPP_CONNECT_RPC_TIMEOUT_MS") {
            cfg.rpc_timeout_ms = v;
        }
        cfg
    }

    pub fn unlock_timeout(&self) -> Duration {
        Duration::from_millis(self.unlock_timeout_ms)
    }

    pub fn identity_ttl(&self) -> Duration {
        Duration::from_millis(self.identity_ttl_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Anchored pattern matching every relay cache key.
    pub fn relay_storage_pattern(&self) -> Result<regex::Regex, regex::Error> {
        regex::Regex::new(&format!("^{}", regex::escape(&self.relay_storage_prefix)))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = env_string(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(%name, %raw, error = %e, "ignoring malformed environment override");
            None
        }
    }
}
