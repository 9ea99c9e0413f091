use alloy::primitives::Address;
use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::adapter::RawProvider;
use crate::domain::{ChainId, ConnectorUpdate, ProviderKind};
use crate::events::{ConnectorEvent, EventListener, Subscription};
use crate::rpc::RpcError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{0}")]
    WalletLocked(String),
    #[error("user rejected: {0}")]
    UserRejected(String),
    #[error("stale session: {0}")]
    StaleSession(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error: {0}")]
    Rpc(RpcError),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("Invalid provider {0}")]
    InvalidProviderKind(String),
    #[error("Could not find a valid provider. Make sure to call the `connect` method first")]
    NoStoredConnection,
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("activation already in progress: {0}")]
    ActivationInProgress(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl ConnectError {
    pub fn lock_poisoned(what: &str, e: impl std::fmt::Display) -> Self {
        Self::Transport(format!("{what} lock poisoned: {e}"))
    }
}

/// Key/value persistence. A missing key reads as `None` and never errors.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
    fn remove_by_pattern(&self, pattern: &Regex);
}

/// How a connector is torn down, decided when the connector is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// `deactivate` is all there is.
    FireAndForget,
    /// The transport needs an explicit `close` after `deactivate`.
    Close,
}

/// Uniform lifecycle over one wallet backend.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Connector: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn supported_chain_ids(&self) -> Vec<ChainId>;

    fn teardown(&self) -> Teardown {
        Teardown::FireAndForget
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError>;

    async fn provider(&self) -> Result<RawProvider, ConnectError>;

    async fn chain_id(&self) -> Result<ChainId, ConnectError>;

    /// `Ok(None)` when no account is known.
    async fn account(&self) -> Result<Option<Address>, ConnectError>;

    fn deactivate(&self);

    async fn close(&self) -> Result<(), ConnectError> {
        Ok(())
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription;

    fn wallet_name(&self) -> Option<String> {
        None
    }
}

/// The single place connectors get built from a kind.
pub trait ConnectorFactory: Send + Sync {
    /// Fails synchronously on unsupported chains or missing backends.
    fn build(
        &self,
        kind: ProviderKind,
        chain_id: ChainId,
    ) -> Result<Box<dyn Connector>, ConnectError>;

    /// Whether an in-page wallet object exists in this execution context.
    fn has_injected_wallet(&self) -> bool;

    /// Storage owned by specific backends that should not outlive a session.
    fn residual_storage_patterns(&self) -> Vec<Regex> {
        Vec::new()
    }
}
