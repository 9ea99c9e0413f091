use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::json;

use dapp_connect_core::rpc::parse_accounts;
use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, NormalizedProvider, ProviderKind, RawProvider, Subscription,
    Teardown,
};

use crate::configuration::FortmaticConfiguration;
use crate::sdk::{FortmaticLoader, FortmaticSdk};

pub struct FortmaticConnector {
    chain_id: ChainId,
    api_key: String,
    rpc_url: Option<String>,
    supported: Vec<ChainId>,
    loader: Arc<dyn FortmaticLoader>,
    sdk: Mutex<Option<Arc<dyn FortmaticSdk>>>,
    lifecycle: Lifecycle,
    events: EventEmitter<ConnectorEvent>,
}

impl FortmaticConnector {
    /// Fails unless `chain_id` has an API key configured.
    pub fn new(
        config: &FortmaticConfiguration,
        chain_id: ChainId,
        loader: Arc<dyn FortmaticLoader>,
    ) -> Result<Self, ConnectError> {
        let api_key = config.api_keys.get(&chain_id).cloned().ok_or_else(|| {
            ConnectError::Configuration(format!("Invariant error: Unsupported chainId {chain_id}"))
        })?;
        Ok(Self {
            chain_id,
            api_key,
            rpc_url: config.urls.get(&chain_id).cloned(),
            supported: config.api_keys.keys().copied().collect(),
            loader,
            sdk: Mutex::new(None),
            lifecycle: Lifecycle::new(ProviderKind::Fortmatic),
            events: EventEmitter::default(),
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn loaded(&self) -> Result<Option<Arc<dyn FortmaticSdk>>, ConnectError> {
        Ok(self
            .sdk
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("fortmatic sdk", e))?
            .clone())
    }

    fn sdk(&self) -> Result<Arc<dyn FortmaticSdk>, ConnectError> {
        self.loaded()?.ok_or_else(|| {
            ConnectError::NotConnected("Fortmatic: SDK has not been loaded".to_owned())
        })
    }

    async fn load(&self) -> Result<Arc<dyn FortmaticSdk>, ConnectError> {
        if let Some(sdk) = self.loaded()? {
            return Ok(sdk);
        }
        tracing::debug!(chain_id = %self.chain_id, "loading fortmatic sdk");
        let sdk = self
            .loader
            .load(&self.api_key, self.rpc_url.as_deref(), self.chain_id)
            .await?;
        *self
            .sdk
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("fortmatic sdk", e))? = Some(Arc::clone(&sdk));
        Ok(sdk)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for FortmaticConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Fortmatic
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        self.supported.clone()
    }

    fn teardown(&self) -> Teardown {
        Teardown::Close
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                let sdk = self.load().await?;
                let accounts = sdk.enable().await?;
                Ok(ConnectorUpdate {
                    provider: sdk.provider(),
                    account: accounts.first().copied(),
                    chain_id: Some(self.chain_id),
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(self.sdk()?.provider())
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        Ok(self.chain_id)
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        let provider = NormalizedProvider::adapt(self.sdk()?.provider());
        let raw = provider.request_method("eth_accounts", json!([])).await?;
        Ok(parse_accounts(&raw)?.first().copied())
    }

    fn deactivate(&self) {
        self.lifecycle.deactivate();
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.sdk()?.logout().await
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.events.subscribe(listener)
    }
}
