use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::json;

use dapp_connect_core::rpc::{json_chain_id, parse_accounts};
use dapp_connect_core::timer::race_timeout;
use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, NormalizedProvider, ProviderKind, RawProvider, Subscription,
};

use super::{classify_rejection, forward_provider_events};

const LOCKED_MESSAGE: &str = "Could not enable wallet, it is probably locked. Please unlock it and try again";

/// The wallet object the page already has (`window.ethereum`).
pub struct InjectedConnector {
    raw: RawProvider,
    chain_id: ChainId,
    unlock_timeout: Duration,
    lifecycle: Lifecycle,
    events: EventEmitter<ConnectorEvent>,
    listener: Mutex<Option<Subscription>>,
}

impl InjectedConnector {
    pub fn new(raw: RawProvider, chain_id: ChainId, unlock_timeout: Duration) -> Self {
        Self {
            raw,
            chain_id,
            unlock_timeout,
            lifecycle: Lifecycle::new(ProviderKind::Injected),
            events: EventEmitter::default(),
            listener: Mutex::new(None),
        }
    }

    fn adapter(&self) -> NormalizedProvider {
        NormalizedProvider::adapt(self.raw.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ConnectError> {
        let provider = self.adapter();
        let pending = provider.request_method("eth_requestAccounts", json!([]));
        match race_timeout(pending, self.unlock_timeout).await {
            Some(result) => parse_accounts(&result.map_err(classify_rejection)?),
            None => {
                tracing::warn!(timeout = ?self.unlock_timeout, "injected wallet did not answer, assuming it is locked");
                Err(ConnectError::WalletLocked(LOCKED_MESSAGE.to_owned()))
            }
        }
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for InjectedConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Injected
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        vec![self.chain_id]
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                let accounts = self.request_accounts().await?;
                let listener = forward_provider_events(ProviderKind::Injected, &self.raw, &self.events);
                *self
                    .listener
                    .lock()
                    .map_err(|e| ConnectError::lock_poisoned("injected listener", e))? = listener;
                Ok(ConnectorUpdate {
                    provider: self.raw.clone(),
                    account: accounts.first().copied(),
                    chain_id: None,
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        self.lifecycle.ensure_active()?;
        Ok(self.raw.clone())
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        let raw = self.adapter().request_method("eth_chainId", json!([])).await?;
        json_chain_id(&raw)
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        let raw = self.adapter().request_method("eth_accounts", json!([])).await?;
        Ok(parse_accounts(&raw)?.first().copied())
    }

    fn deactivate(&self) {
        if let Ok(mut g) = self.listener.lock() {
            g.take();
        }
        self.lifecycle.deactivate();
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.events.subscribe(listener)
    }
}
