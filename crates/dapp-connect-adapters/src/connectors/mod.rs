//! One connector per wallet backend, built in exactly one place.

mod auth_server;
mod fortmatic;
mod injected;
mod magic;
mod network;
mod thirdweb;
mod wallet_link;
mod walletconnect;

use std::sync::Arc;

use alloy::primitives::Address;
use regex::Regex;

use dapp_connect_core::rpc::json_chain_id;
use dapp_connect_core::{
    ChainId, ConnectConfig, ConnectError, Connector, ConnectorEvent, ConnectorFactory,
    EventEmitter, ProviderKind, RawProvider, RawProviderEvent, RpcError, SessionRegistry, Storage,
    Subscription,
};

use crate::configuration::Configuration;
use crate::sdk::{
    CompanionOpener, FortmaticLoader, MagicSdk, RelaySdk, RelayTransport, ThirdwebSdk,
    WalletLinkSdk,
};

pub use auth_server::{
    identity_key, AuthIdentity, AuthLink, AuthLinkType, AuthServerConnector, AuthServerProvider,
    AuthServerSignIn, EphemeralIdentity, SignInChallenge, SignedIn, PREVIOUS_ADDRESS_KEY,
};
pub use fortmatic::FortmaticConnector;
pub use injected::InjectedConnector;
pub use magic::{MagicConnector, MAGIC_SWITCH_FAILED, MAGIC_UNSUPPORTED_CHAIN};
pub use network::NetworkConnector;
pub use thirdweb::ThirdwebConnector;
pub use wallet_link::WalletLinkConnector;
pub use walletconnect::{is_stale_session_error, WalletConnectConnector};

#[derive(Clone)]
pub struct AuthServerBackend {
    pub transport: Arc<dyn RelayTransport>,
    pub opener: Arc<dyn CompanionOpener>,
}

/// The SDK bindings available in this execution context. A kind whose
/// backend is missing fails to build with a configuration error.
#[derive(Clone, Default)]
pub struct WalletBackends {
    /// The in-page wallet object, when the page has one.
    pub injected: Option<RawProvider>,
    pub fortmatic: Option<Arc<dyn FortmaticLoader>>,
    pub magic: Option<Arc<dyn MagicSdk>>,
    pub wallet_link: Option<Arc<dyn WalletLinkSdk>>,
    pub relay: Option<Arc<dyn RelaySdk>>,
    pub thirdweb: Option<Arc<dyn ThirdwebSdk>>,
    pub auth_server: Option<AuthServerBackend>,
}

pub struct SdkConnectorFactory {
    configuration: Arc<Configuration>,
    backends: WalletBackends,
    storage: Arc<dyn Storage>,
    registry: Arc<SessionRegistry>,
    config: ConnectConfig,
}

impl SdkConnectorFactory {
    pub fn new(
        configuration: Configuration,
        backends: WalletBackends,
        storage: Arc<dyn Storage>,
        config: ConnectConfig,
    ) -> Self {
        Self {
            configuration: Arc::new(configuration),
            backends,
            storage,
            registry: SessionRegistry::global(),
            config,
        }
    }

    /// Replaces the process-wide session registry, mostly for tests.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Entry point for the two-phase auth-server sign-in.
    pub fn auth_server_sign_in(&self) -> Result<AuthServerSignIn, ConnectError> {
        let backend = self
            .backends
            .auth_server
            .clone()
            .ok_or_else(|| missing_backend(ProviderKind::AuthServer))?;
        Ok(AuthServerSignIn::new(
            backend,
            self.configuration.auth_server.clone(),
            Arc::clone(&self.storage),
            self.config.identity_ttl(),
        ))
    }
}

impl ConnectorFactory for SdkConnectorFactory {
    fn build(
        &self,
        kind: ProviderKind,
        chain_id: ChainId,
    ) -> Result<Box<dyn Connector>, ConnectError> {
        tracing::debug!(%kind, %chain_id, "building connector");
        let cfg = &self.configuration;
        let connector: Box<dyn Connector> = match kind {
            ProviderKind::Injected => {
                let raw = self
                    .backends
                    .injected
                    .clone()
                    .ok_or_else(|| missing_backend(kind))?;
                Box::new(InjectedConnector::new(raw, chain_id, self.config.unlock_timeout()))
            }
            ProviderKind::Fortmatic => {
                let loader = self
                    .backends
                    .fortmatic
                    .clone()
                    .ok_or_else(|| missing_backend(kind))?;
                Box::new(FortmaticConnector::new(&cfg.fortmatic, chain_id, loader)?)
            }
            ProviderKind::Magic | ProviderKind::MagicTest => {
                let sdk = self.backends.magic.clone().ok_or_else(|| missing_backend(kind))?;
                let test = kind == ProviderKind::MagicTest;
                Box::new(MagicConnector::new(cfg.magic_for(test), chain_id, sdk, test)?)
            }
            ProviderKind::WalletLink => {
                let sdk = self
                    .backends
                    .wallet_link
                    .clone()
                    .ok_or_else(|| missing_backend(kind))?;
                Box::new(WalletLinkConnector::new(&cfg.wallet_link, chain_id, sdk))
            }
            ProviderKind::WalletConnectV2 => {
                let sdk = self.backends.relay.clone().ok_or_else(|| missing_backend(kind))?;
                let purge = self.config.relay_storage_pattern().map_err(|e| {
                    ConnectError::Configuration(format!("invalid relay storage prefix: {e}"))
                })?;
                Box::new(WalletConnectConnector::new(
                    &cfg.wallet_connect_v2,
                    chain_id,
                    sdk,
                    self.registry(),
                    Arc::clone(&self.storage),
                    purge,
                )?)
            }
            ProviderKind::Network => Box::new(NetworkConnector::new(
                &cfg.network,
                chain_id,
                self.config.rpc_timeout(),
            )?),
            ProviderKind::AuthServer => {
                let backend = self
                    .backends
                    .auth_server
                    .clone()
                    .ok_or_else(|| missing_backend(kind))?;
                Box::new(AuthServerConnector::new(
                    AuthServerProvider::new(
                        backend,
                        cfg.auth_server.clone(),
                        cfg.network.urls.clone(),
                        chain_id,
                        self.config.rpc_timeout(),
                    )
                    .with_registry(self.registry()),
                    Arc::clone(&self.storage),
                ))
            }
            ProviderKind::Thirdweb => {
                let sdk = self
                    .backends
                    .thirdweb
                    .clone()
                    .ok_or_else(|| missing_backend(kind))?;
                Box::new(ThirdwebConnector::new(&cfg.thirdweb, chain_id, sdk)?)
            }
        };
        Ok(connector)
    }

    fn has_injected_wallet(&self) -> bool {
        self.backends.injected.is_some()
    }

    fn residual_storage_patterns(&self) -> Vec<Regex> {
        match self.config.relay_storage_pattern() {
            Ok(pattern) => vec![pattern],
            Err(e) => {
                tracing::warn!(error = %e, "relay storage prefix is not a valid pattern");
                Vec::new()
            }
        }
    }
}

fn missing_backend(kind: ProviderKind) -> ConnectError {
    ConnectError::Configuration(format!("no {kind} backend is available in this context"))
}

/// Re-publishes a wallet's `chainChanged`/`accountsChanged`/`disconnect`
/// through the connector's own emitter.
pub(crate) fn forward_provider_events(
    kind: ProviderKind,
    raw: &RawProvider,
    emitter: &EventEmitter<ConnectorEvent>,
) -> Option<Subscription> {
    let events = raw.events()?;
    let emitter = emitter.clone();
    Some(events.on(Arc::new(move |event: &RawProviderEvent| {
        match translate_provider_event(event) {
            Ok(translated) => emitter.emit(&translated),
            Err(e) => tracing::warn!(%kind, error = %e, "ignoring malformed provider event"),
        }
    })))
}

pub(crate) fn translate_provider_event(
    event: &RawProviderEvent,
) -> Result<ConnectorEvent, ConnectError> {
    match event {
        RawProviderEvent::ChainChanged(raw) => json_chain_id(raw).map(ConnectorEvent::ChainChanged),
        RawProviderEvent::AccountsChanged(accounts) => {
            let first = accounts
                .first()
                .map(|raw| {
                    raw.parse::<Address>().map_err(|e| {
                        ConnectError::Validation(format!("invalid account address {raw}: {e}"))
                    })
                })
                .transpose()?;
            Ok(ConnectorEvent::AccountChanged(first))
        }
        RawProviderEvent::Disconnect(_) => Ok(ConnectorEvent::SessionEnded),
    }
}

/// EIP-1193 4001 and the relay modal's close/reset messages mean the user
/// backed out on purpose.
pub(crate) fn classify_rejection(err: ConnectError) -> ConnectError {
    match err {
        ConnectError::Rpc(ref rpc) if rpc.code == RpcError::USER_REJECTED => {
            ConnectError::UserRejected(rpc.message.clone())
        }
        ConnectError::Transport(ref msg) => {
            let lower = msg.to_lowercase();
            if lower.contains("user rejected")
                || lower.contains("connection request reset")
                || lower.contains("modal closed")
            {
                ConnectError::UserRejected(msg.clone())
            } else {
                err
            }
        }
        other => other,
    }
}
