use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::json;

use dapp_connect_core::rpc::{json_chain_id, parse_accounts};
use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, NormalizedProvider, ProviderKind, RawProvider, Subscription,
    Teardown,
};

use super::{classify_rejection, forward_provider_events};
use crate::configuration::WalletLinkConfiguration;
use crate::sdk::{WalletLinkProvider, WalletLinkSdk};

/// Coinbase-style deep-link wallet, offered when the page has no wallet of
/// its own.
pub struct WalletLinkConnector {
    chain_id: ChainId,
    app_name: String,
    rpc_url: Option<String>,
    sdk: Arc<dyn WalletLinkSdk>,
    provider: Mutex<Option<Arc<dyn WalletLinkProvider>>>,
    listener: Mutex<Option<Subscription>>,
    lifecycle: Lifecycle,
    events: EventEmitter<ConnectorEvent>,
}

impl WalletLinkConnector {
    pub fn new(
        config: &WalletLinkConfiguration,
        chain_id: ChainId,
        sdk: Arc<dyn WalletLinkSdk>,
    ) -> Self {
        Self {
            chain_id,
            app_name: config.app_name.clone(),
            rpc_url: config.urls.get(&chain_id).cloned(),
            sdk,
            provider: Mutex::new(None),
            listener: Mutex::new(None),
            lifecycle: Lifecycle::new(ProviderKind::WalletLink),
            events: EventEmitter::default(),
        }
    }

    fn current(&self) -> Result<Arc<dyn WalletLinkProvider>, ConnectError> {
        self.provider
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("wallet link provider", e))?
            .clone()
            .ok_or_else(|| ConnectError::NotConnected("WalletLink: provider is undefined".to_owned()))
    }

    fn drop_listener(&self) {
        if let Ok(mut g) = self.listener.lock() {
            g.take();
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for WalletLinkConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WalletLink
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        vec![self.chain_id]
    }

    fn teardown(&self) -> Teardown {
        Teardown::Close
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                let provider =
                    self.sdk
                        .make_web3_provider(&self.app_name, self.rpc_url.as_deref(), self.chain_id)?;
                let raw = provider.raw();
                let accounts = NormalizedProvider::adapt(raw.clone())
                    .request_method("eth_requestAccounts", json!([]))
                    .await
                    .map_err(classify_rejection)?;
                let account = parse_accounts(&accounts)?.first().copied();

                let listener = forward_provider_events(ProviderKind::WalletLink, &raw, &self.events);
                *self
                    .listener
                    .lock()
                    .map_err(|e| ConnectError::lock_poisoned("wallet link listener", e))? = listener;
                *self
                    .provider
                    .lock()
                    .map_err(|e| ConnectError::lock_poisoned("wallet link provider", e))? =
                    Some(provider);

                Ok(ConnectorUpdate {
                    provider: raw,
                    account,
                    chain_id: None,
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(self.current()?.raw())
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        let provider = NormalizedProvider::adapt(self.current()?.raw());
        json_chain_id(&provider.request_method("eth_chainId", json!([])).await?)
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        let provider = NormalizedProvider::adapt(self.current()?.raw());
        let raw = provider.request_method("eth_accounts", json!([])).await?;
        Ok(parse_accounts(&raw)?.first().copied())
    }

    fn deactivate(&self) {
        self.drop_listener();
        self.lifecycle.deactivate();
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.drop_listener();
        let provider = self
            .provider
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("wallet link provider", e))?
            .take();
        match provider {
            Some(provider) => provider.close().await,
            None => Ok(()),
        }
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.events.subscribe(listener)
    }
}
