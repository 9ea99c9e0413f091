//! The connection manager: single source of truth for "what is the current
//! connection".

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{FutureExt, Shared};

use crate::adapter::NormalizedProvider;
use crate::config::ConnectConfig;
use crate::domain::{
    ChainId, ConnectionDescriptor, ConnectionResponse, ConnectorUpdate, ProviderKind,
};
use crate::events::{
    ConnectionEvent, ConnectorEvent, EventEmitter, EventListener, Subscription,
};
use crate::ports::{ConnectError, Connector, ConnectorFactory, Storage, Teardown};
use crate::rpc::json_chain_id;

#[cfg(not(target_arch = "wasm32"))]
type ReconnectFuture = futures::future::BoxFuture<'static, Result<ConnectionResponse, ConnectError>>;
#[cfg(target_arch = "wasm32")]
type ReconnectFuture =
    futures::future::LocalBoxFuture<'static, Result<ConnectionResponse, ConnectError>>;

type InFlight = Shared<ReconnectFuture>;

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
    /// Kept outside `inner`: on wasm32 the shared future is `!Send`, while
    /// `inner` is captured by connector listeners.
    reconnecting: Arc<Mutex<Reconnecting>>,
}

#[derive(Default)]
struct Reconnecting {
    seq: u64,
    in_flight: Option<(u64, InFlight)>,
}

struct ManagerInner {
    storage: Arc<dyn Storage>,
    factory: Arc<dyn ConnectorFactory>,
    config: ConnectConfig,
    state: Mutex<ManagerState>,
    /// Serializes `connect`/`disconnect` so two transports never coexist.
    connect_gate: tokio::sync::Mutex<()>,
    events: EventEmitter<ConnectionEvent>,
}

#[derive(Default)]
struct ManagerState {
    active: Option<ActiveConnection>,
    generation: u64,
}

struct ActiveConnection {
    generation: u64,
    kind: ProviderKind,
    connector: Arc<dyn Connector>,
    subscription: Subscription,
}

impl ConnectionManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        factory: Arc<dyn ConnectorFactory>,
        config: ConnectConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                storage,
                factory,
                config,
                state: Mutex::new(ManagerState::default()),
                connect_gate: tokio::sync::Mutex::new(()),
                events: EventEmitter::default(),
            }),
            reconnecting: Arc::new(Mutex::new(Reconnecting::default())),
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.inner.storage)
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.inner.config
    }

    /// Connects through `kind`, defaulting to Ethereum mainnet. Any current
    /// connection is torn down first.
    pub async fn connect(
        &self,
        kind: ProviderKind,
        chain_id: impl Into<Option<ChainId>>,
    ) -> Result<ConnectionResponse, ConnectError> {
        let chain_id = chain_id.into().unwrap_or(ChainId::ETHEREUM_MAINNET);
        self.inner.connect(kind, chain_id).await
    }

    /// Restores the persisted connection. Overlapping calls share a single
    /// activation.
    pub async fn try_previous_connection(&self) -> Result<ConnectionResponse, ConnectError> {
        let (seq, in_flight) = {
            let mut g = self.lock_reconnecting();
            match &g.in_flight {
                Some((seq, fut)) => (*seq, fut.clone()),
                None => {
                    g.seq = g.seq.saturating_add(1);
                    let seq = g.seq;
                    let fut = Self::box_reconnect(Arc::clone(&self.inner)).shared();
                    g.in_flight = Some((seq, fut.clone()));
                    (seq, fut)
                }
            }
        };

        let result = in_flight.await;

        let mut g = self.lock_reconnecting();
        if matches!(&g.in_flight, Some((current, _)) if *current == seq) {
            g.in_flight = None;
        }
        result
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn box_reconnect(inner: Arc<ManagerInner>) -> ReconnectFuture {
        inner.reconnect().boxed()
    }

    #[cfg(target_arch = "wasm32")]
    fn box_reconnect(inner: Arc<ManagerInner>) -> ReconnectFuture {
        inner.reconnect().boxed_local()
    }

    fn lock_reconnecting(&self) -> MutexGuard<'_, Reconnecting> {
        match self.reconnecting.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Never fails: teardown errors are logged and local state is cleared anyway.
    pub async fn disconnect(&self) {
        let _gate = self.inner.connect_gate.lock().await;
        let previous = self.inner.take_active();
        let had_connection = previous.is_some();
        if let Some(active) = previous {
            let kind = active.kind;
            if let Err(e) = shut_down(active).await {
                tracing::warn!(%kind, error = %e, "connector teardown failed during disconnect");
            }
        }

        self.inner.storage.remove(&self.inner.config.storage_key);
        for pattern in self.inner.factory.residual_storage_patterns() {
            self.inner.storage.remove_by_pattern(&pattern);
        }

        if had_connection {
            tracing::info!("wallet disconnected");
            self.inner.events.emit(&ConnectionEvent::Disconnected);
        }
    }

    pub async fn get_provider(&self) -> Result<NormalizedProvider, ConnectError> {
        let connector = self.inner.active_connector().ok_or_else(|| {
            ConnectError::NotConnected("No valid connector found. Please .connect() first".to_owned())
        })?;
        let raw = connector.provider().await?;
        Ok(NormalizedProvider::adapt(raw))
    }

    /// Activates a throwaway connector without touching the current
    /// connection or the persisted descriptor.
    pub async fn create_provider(
        &self,
        kind: ProviderKind,
        chain_id: impl Into<Option<ChainId>>,
    ) -> Result<NormalizedProvider, ConnectError> {
        let chain_id = chain_id.into().unwrap_or(ChainId::ETHEREUM_MAINNET);
        let connector = self.inner.factory.build(kind, chain_id)?;
        let update = connector.activate().await?;
        Ok(NormalizedProvider::adapt(update.provider))
    }

    pub fn get_available_providers(&self) -> Vec<ProviderKind> {
        let mut available = vec![
            ProviderKind::Fortmatic,
            ProviderKind::WalletConnectV2,
            ProviderKind::Magic,
            ProviderKind::Thirdweb,
        ];
        if self.inner.factory.has_injected_wallet() {
            available.insert(0, ProviderKind::Injected);
        } else {
            available.insert(0, ProviderKind::WalletLink);
        }
        available
    }

    pub fn get_connection_data(&self) -> Option<ConnectionDescriptor> {
        self.inner.read_descriptor()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.active_connector().is_some() && self.inner.read_descriptor().is_some()
    }

    pub fn get_wallet_name(&self) -> Option<String> {
        self.inner.active_connector()?.wallet_name()
    }

    pub fn current_kind(&self) -> Option<ProviderKind> {
        self.inner.lock_state().active.as_ref().map(|a| a.kind)
    }

    pub fn subscribe(&self, listener: EventListener<ConnectionEvent>) -> Subscription {
        self.inner.events.subscribe(listener)
    }
}

impl ManagerInner {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("connection manager state mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn active_connector(&self) -> Option<Arc<dyn Connector>> {
        self.lock_state()
            .active
            .as_ref()
            .map(|a| Arc::clone(&a.connector))
    }

    fn take_active(&self) -> Option<ActiveConnection> {
        self.lock_state().active.take()
    }

    async fn connect(
        self: &Arc<Self>,
        kind: ProviderKind,
        requested: ChainId,
    ) -> Result<ConnectionResponse, ConnectError> {
        let _gate = self.connect_gate.lock().await;

        if let Some(previous) = self.take_active() {
            let previous_kind = previous.kind;
            if let Err(e) = shut_down(previous).await {
                tracing::warn!(
                    kind = %previous_kind,
                    error = %e,
                    "failed to disconnect previous connector; continuing with new connection"
                );
            }
        }

        let connector: Arc<dyn Connector> = Arc::from(self.factory.build(kind, requested)?);
        tracing::debug!(%kind, chain_id = %requested, "activating connector");
        let update = connector.activate().await?;

        match self.settle(kind, requested, &connector, update).await {
            Ok(response) => Ok(response),
            Err(e) => {
                connector.deactivate();
                if connector.teardown() == Teardown::Close {
                    if let Err(close_err) = connector.close().await {
                        tracing::warn!(%kind, error = %close_err, "failed to close connector after a failed connect");
                    }
                }
                Err(e)
            }
        }
    }

    async fn settle(
        self: &Arc<Self>,
        kind: ProviderKind,
        requested: ChainId,
        connector: &Arc<dyn Connector>,
        update: ConnectorUpdate,
    ) -> Result<ConnectionResponse, ConnectError> {
        let provider = NormalizedProvider::adapt(update.provider.clone());
        let chain_id = self
            .reconcile_chain(kind, requested, &update, &provider)
            .await?;
        let descriptor = ConnectionDescriptor {
            provider_kind: kind,
            chain_id,
        };
        self.write_descriptor(&descriptor)?;

        let generation = {
            let mut g = self.lock_state();
            g.generation = g.generation.saturating_add(1);
            g.generation
        };
        let weak = Arc::downgrade(self);
        let subscription = connector.subscribe(Arc::new(move |event: &ConnectorEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connector_event(generation, event);
            }
        }));
        self.lock_state().active = Some(ActiveConnection {
            generation,
            kind,
            connector: Arc::clone(connector),
            subscription,
        });

        tracing::info!(%kind, %chain_id, account = ?update.account, "wallet connected");
        self.events.emit(&ConnectionEvent::Connected(descriptor));

        Ok(ConnectionResponse {
            provider,
            provider_kind: kind,
            account: update.account,
            chain_id,
        })
    }

    /// The chain a transport is actually on wins over the requested one.
    async fn reconcile_chain(
        &self,
        kind: ProviderKind,
        requested: ChainId,
        update: &ConnectorUpdate,
        provider: &NormalizedProvider,
    ) -> Result<ChainId, ConnectError> {
        let actual = match kind {
            ProviderKind::Injected => {
                let raw = provider
                    .request_method("eth_chainId", serde_json::json!([]))
                    .await?;
                json_chain_id(&raw)?
            }
            _ => update.chain_id.unwrap_or(requested),
        };
        if actual != requested {
            tracing::info!(%kind, %requested, %actual, "wallet is connected to a different chain than requested");
        }
        Ok(actual)
    }

    async fn reconnect(self: Arc<Self>) -> Result<ConnectionResponse, ConnectError> {
        let stored = self.read_descriptor().ok_or(ConnectError::NoStoredConnection)?;
        let response = self.connect(stored.provider_kind, stored.chain_id).await?;

        // Read storage back instead of trusting the in-memory result.
        let persisted = self.read_descriptor();
        if persisted != Some(response.descriptor()) {
            tracing::info!(
                stored = ?persisted,
                actual = %response.chain_id,
                "correcting persisted connection after reconnect"
            );
            self.write_descriptor(&response.descriptor())?;
        }
        Ok(response)
    }

    fn on_connector_event(&self, generation: u64, event: &ConnectorEvent) {
        let kind = {
            let g = self.lock_state();
            match g.active.as_ref() {
                Some(active) if active.generation == generation => active.kind,
                _ => return,
            }
        };

        match event {
            ConnectorEvent::ChainChanged(chain_id) => {
                let descriptor = ConnectionDescriptor {
                    provider_kind: kind,
                    chain_id: *chain_id,
                };
                if self.read_descriptor() != Some(descriptor) {
                    tracing::info!(%kind, %chain_id, "wallet switched chain");
                    if let Err(e) = self.write_descriptor(&descriptor) {
                        tracing::warn!(error = %e, "failed to persist chain change");
                    }
                }
                self.events.emit(&ConnectionEvent::ChainChanged(descriptor));
            }
            ConnectorEvent::AccountChanged(account) => {
                self.events.emit(&ConnectionEvent::AccountChanged(*account));
            }
            ConnectorEvent::SessionEnded => {
                let ended = {
                    let mut g = self.lock_state();
                    match g.active.as_ref() {
                        Some(active) if active.generation == generation => g.active.take(),
                        _ => None,
                    }
                };
                if let Some(active) = ended {
                    tracing::info!(%kind, "wallet session ended by transport");
                    let ActiveConnection {
                        connector,
                        subscription,
                        ..
                    } = active;
                    drop(subscription);
                    connector.deactivate();
                    self.storage.remove(&self.config.storage_key);
                    self.events.emit(&ConnectionEvent::Disconnected);
                }
            }
        }
    }

    fn read_descriptor(&self) -> Option<ConnectionDescriptor> {
        let raw = self.storage.get(&self.config.storage_key)?;
        match serde_json::from_str(&raw) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed connection descriptor");
                None
            }
        }
    }

    fn write_descriptor(&self, descriptor: &ConnectionDescriptor) -> Result<(), ConnectError> {
        let raw = serde_json::to_string(descriptor).map_err(|e| {
            ConnectError::Validation(format!("descriptor serialization failed: {e}"))
        })?;
        self.storage.set(&self.config.storage_key, &raw);
        Ok(())
    }
}

/// Listeners go first so nothing fires against a connector being torn down.
async fn shut_down(active: ActiveConnection) -> Result<(), ConnectError> {
    let ActiveConnection {
        connector,
        subscription,
        ..
    } = active;
    drop(subscription);
    connector.deactivate();
    if connector.teardown() == Teardown::Close {
        connector.close().await?;
    }
    Ok(())
}
