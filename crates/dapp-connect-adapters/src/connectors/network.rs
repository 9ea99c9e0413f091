use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;

use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, ProviderKind, RawProvider, Subscription,
};

use crate::configuration::NetworkConfiguration;
use crate::rpc_client::HttpJsonRpc;

/// Read-only access to a chain through a public RPC node. No account.
pub struct NetworkConnector {
    chain_id: ChainId,
    supported: Vec<ChainId>,
    transport: Arc<HttpJsonRpc>,
    lifecycle: Lifecycle,
    events: EventEmitter<ConnectorEvent>,
}

impl NetworkConnector {
    pub fn new(
        config: &NetworkConfiguration,
        chain_id: ChainId,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let url = config.urls.get(&chain_id).ok_or_else(|| {
            ConnectError::Configuration(format!("no RPC url configured for chain {chain_id}"))
        })?;
        Ok(Self {
            chain_id,
            supported: config.urls.keys().copied().collect(),
            transport: Arc::new(HttpJsonRpc::new(url.clone(), timeout)),
            lifecycle: Lifecycle::new(ProviderKind::Network),
            events: EventEmitter::default(),
        })
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    fn raw(&self) -> RawProvider {
        RawProvider::modern(self.transport.clone())
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for NetworkConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Network
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        self.supported.clone()
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                Ok(ConnectorUpdate {
                    provider: self.raw(),
                    account: None,
                    chain_id: Some(self.chain_id),
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(self.raw())
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        Ok(self.chain_id)
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        Ok(None)
    }

    fn deactivate(&self) {
        self.lifecycle.deactivate();
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.events.subscribe(listener)
    }
}
