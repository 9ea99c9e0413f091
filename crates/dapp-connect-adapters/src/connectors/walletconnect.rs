//! WalletConnect v2 relay sessions.
//!
//! The relay provider is process-wide: it lives in the [`SessionRegistry`]
//! under [`ProviderKind::WalletConnectV2`] and every connector instance
//! reuses it. Activation holds the registry's enabling latch so two
//! activations can never open two pairing modals.

use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use regex::Regex;

use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, ProviderKind, RawProvider, RawProviderEvent, SessionRegistry,
    Storage, Subscription, Teardown,
};

use super::{classify_rejection, translate_provider_event};
use crate::configuration::WalletConnectConfiguration;
use crate::sdk::{RelayInitOptions, RelaySdk, RelaySession};

const KIND: ProviderKind = ProviderKind::WalletConnectV2;

const STALE_SESSION_MARKERS: [&str; 4] = [
    "no matching key",
    "session topic doesn't exist",
    "missing or invalid",
    "expired",
];

/// Whether a relay error means the cached pairing no longer exists on the
/// peer side.
pub fn is_stale_session_error(err: &ConnectError) -> bool {
    if matches!(err, ConnectError::StaleSession(_)) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    STALE_SESSION_MARKERS.iter().any(|m| message.contains(m))
}

/// Registry entry type.
struct SharedRelay(Arc<dyn RelaySession>);

pub struct WalletConnectConnector {
    shared: Arc<WcShared>,
}

struct WcShared {
    supported: Vec<ChainId>,
    options: RelayInitOptions,
    sdk: Arc<dyn RelaySdk>,
    registry: Arc<SessionRegistry>,
    storage: Arc<dyn Storage>,
    purge_pattern: Regex,
    session: Mutex<Option<Arc<dyn RelaySession>>>,
    listener: Mutex<Option<Subscription>>,
    lifecycle: Lifecycle,
    events: EventEmitter<ConnectorEvent>,
}

impl WalletConnectConnector {
    pub fn new(
        config: &WalletConnectConfiguration,
        chain_id: ChainId,
        sdk: Arc<dyn RelaySdk>,
        registry: Arc<SessionRegistry>,
        storage: Arc<dyn Storage>,
        purge_pattern: Regex,
    ) -> Result<Self, ConnectError> {
        let entry = config.chains.get(&chain_id).ok_or_else(|| {
            let supported: Vec<String> = config.chains.keys().map(ToString::to_string).collect();
            ConnectError::Configuration(format!(
                "Unsupported chainId for WalletConnect: {chain_id}. Supported chains: {}",
                supported.join(", ")
            ))
        })?;
        if config.project_id.is_empty() {
            return Err(ConnectError::Configuration(
                "WalletConnect: projectId is not configured".to_owned(),
            ));
        }

        let mut supported = entry.chains.clone();
        supported.extend(entry.optional_chains.iter().copied());

        let options = RelayInitOptions {
            project_id: config.project_id.clone(),
            rpc_map: config.urls.clone(),
            chains: entry.chains.clone(),
            optional_chains: entry.optional_chains.clone(),
            show_qr_modal: true,
            disable_provider_ping: true,
            methods: strings(&["eth_sendTransaction", "personal_sign"]),
            optional_methods: strings(&[
                "eth_accounts",
                "eth_requestAccounts",
                "eth_sign",
                "eth_signTypedData_v4",
                "wallet_switchEthereumChain",
                "wallet_addEthereumChain",
            ]),
            events: strings(&["chainChanged", "accountsChanged"]),
            optional_events: strings(&["disconnect"]),
        };

        Ok(Self {
            shared: Arc::new(WcShared {
                supported,
                options,
                sdk,
                registry,
                storage,
                purge_pattern,
                session: Mutex::new(None),
                listener: Mutex::new(None),
                lifecycle: Lifecycle::new(KIND),
                events: EventEmitter::default(),
            }),
        })
    }

    pub fn init_options(&self) -> &RelayInitOptions {
        &self.shared.options
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

impl WcShared {
    fn current(&self) -> Result<Arc<dyn RelaySession>, ConnectError> {
        self.session
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("relay session", e))?
            .clone()
            .ok_or_else(|| ConnectError::NotConnected("Provider is undefined".to_owned()))
    }

    async fn init(&self) -> Result<Arc<dyn RelaySession>, ConnectError> {
        if let Some(shared) = self.registry.get::<SharedRelay>(KIND) {
            tracing::debug!("reusing process-wide relay session");
            return Ok(Arc::clone(&shared.0));
        }
        self.sdk.init(self.options.clone()).await
    }

    /// Init and enable, with exactly one purge-and-retry when the cached
    /// session turns out to be stale.
    async fn open(&self) -> Result<(Arc<dyn RelaySession>, Vec<Address>), ConnectError> {
        let mut retried = false;
        loop {
            let attempt = async {
                let session = self.init().await?;
                let accounts = session.enable().await?;
                Ok::<_, ConnectError>((session, accounts))
            }
            .await;
            match attempt {
                Ok(opened) => return Ok(opened),
                Err(e) if is_stale_session_error(&e) && !retried => {
                    tracing::warn!(error = %e, "relay session is stale, clearing storage and retrying");
                    retried = true;
                    self.purge();
                }
                Err(e) if is_stale_session_error(&e) => {
                    return Err(ConnectError::StaleSession(e.to_string()));
                }
                Err(e) => return Err(classify_rejection(e)),
            }
        }
    }

    fn purge(&self) {
        self.storage.remove_by_pattern(&self.purge_pattern);
        self.registry.take::<SharedRelay>(KIND);
    }

    fn listen(self: &Arc<Self>, raw: &RawProvider) -> Option<Subscription> {
        let events = raw.events()?;
        let weak = Arc::downgrade(self);
        Some(events.on(Arc::new(move |event: &RawProviderEvent| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let RawProviderEvent::Disconnect(reason) = event {
                shared.on_peer_disconnect(reason.as_deref());
                return;
            }
            match translate_provider_event(event) {
                Ok(translated) => shared.events.emit(&translated),
                Err(e) => tracing::warn!(error = %e, "ignoring malformed relay event"),
            }
        })))
    }

    fn on_peer_disconnect(&self, reason: Option<&str>) {
        tracing::info!(?reason, "relay peer disconnected");
        let listener = self.listener.lock().ok().and_then(|mut g| g.take());
        drop(listener);
        if let Ok(mut g) = self.session.lock() {
            g.take();
        }
        self.registry.take::<SharedRelay>(KIND);
        self.lifecycle.deactivate();
        self.events.emit(&ConnectorEvent::SessionEnded);
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for WalletConnectConnector {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        self.shared.supported.clone()
    }

    fn teardown(&self) -> Teardown {
        Teardown::Close
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        let _latch = self.shared.registry.begin_enable(KIND)?;
        let shared = &self.shared;
        shared
            .lifecycle
            .activate(async {
                let (session, accounts) = shared.open().await?;
                shared
                    .registry
                    .store(KIND, Arc::new(SharedRelay(Arc::clone(&session))))?;

                let raw = session.raw();
                let listener = shared.listen(&raw);
                *shared
                    .listener
                    .lock()
                    .map_err(|e| ConnectError::lock_poisoned("relay listener", e))? = listener;
                *shared
                    .session
                    .lock()
                    .map_err(|e| ConnectError::lock_poisoned("relay session", e))? =
                    Some(Arc::clone(&session));

                Ok(ConnectorUpdate {
                    provider: raw,
                    account: accounts.first().copied(),
                    chain_id: Some(session.chain_id()),
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(self.shared.current()?.raw())
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        Ok(self.shared.current()?.chain_id())
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        Ok(self.shared.current()?.accounts().first().copied())
    }

    fn deactivate(&self) {
        self.shared.lifecycle.deactivate();
    }

    /// Listeners go before the disconnect so no callback fires mid-teardown.
    /// Disconnect failures are logged only.
    async fn close(&self) -> Result<(), ConnectError> {
        let listener = self
            .shared
            .listener
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("relay listener", e))?
            .take();
        drop(listener);
        let session = self
            .shared
            .session
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("relay session", e))?
            .take();
        let Some(session) = session else {
            return Ok(());
        };
        self.shared.registry.take::<SharedRelay>(KIND);
        if let Err(e) = session.disconnect().await {
            tracing::warn!(error = %e, "error during relay disconnect");
        }
        Ok(())
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.shared.events.subscribe(listener)
    }

    fn wallet_name(&self) -> Option<String> {
        self.shared.current().ok()?.peer_name()
    }
}
