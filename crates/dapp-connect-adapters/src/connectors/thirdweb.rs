use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;

use dapp_connect_core::rpc::switch_chain_target;
use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, NormalizedProvider, ProviderKind, RawProvider, RequestArguments,
    RequestTransport, RpcError, Subscription, Teardown,
};

use crate::configuration::ThirdwebConfiguration;
use crate::sdk::ThirdwebSdk;

const NO_SESSION: &str = "Thirdweb: No active session. User must authenticate first.";

/// In-app wallet (email OTP, social logins). The host authenticates through
/// the SDK first; activation only restores that session.
pub struct ThirdwebConnector {
    client_id: String,
    shared: Arc<ThirdwebShared>,
    lifecycle: Lifecycle,
}

struct ThirdwebShared {
    sdk: Arc<dyn ThirdwebSdk>,
    supported: Vec<ChainId>,
    chain_id: Mutex<ChainId>,
    inner: Mutex<Option<RawProvider>>,
    events: EventEmitter<ConnectorEvent>,
}

impl ThirdwebConnector {
    pub fn new(
        config: &ThirdwebConfiguration,
        chain_id: ChainId,
        sdk: Arc<dyn ThirdwebSdk>,
    ) -> Result<Self, ConnectError> {
        let client_id = config
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ConnectError::Configuration("Thirdweb: clientId is not configured".to_owned())
            })?;
        let supported = if config.chains.is_empty() {
            vec![ChainId::ETHEREUM_MAINNET, ChainId::ETHEREUM_SEPOLIA]
        } else {
            config.chains.clone()
        };
        Ok(Self {
            client_id,
            shared: Arc::new(ThirdwebShared {
                sdk,
                supported,
                chain_id: Mutex::new(chain_id),
                inner: Mutex::new(None),
                events: EventEmitter::default(),
            }),
            lifecycle: Lifecycle::new(ProviderKind::Thirdweb),
        })
    }
}

impl ThirdwebShared {
    fn current_chain(&self) -> ChainId {
        match self.chain_id.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn inner(&self) -> Result<RawProvider, ConnectError> {
        self.inner
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("thirdweb provider", e))?
            .clone()
            .ok_or_else(|| {
                ConnectError::NotConnected(
                    "Thirdweb: wallet is not connected. Call activate() first.".to_owned(),
                )
            })
    }

    fn bind(&self, chain_id: ChainId) -> Result<(), ConnectError> {
        let provider = self.sdk.to_provider(chain_id)?;
        *self
            .inner
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("thirdweb provider", e))? = Some(provider);
        *self
            .chain_id
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("thirdweb chain", e))? = chain_id;
        Ok(())
    }

    /// Unlike Magic, an unsupported chain is an error here.
    fn switch_chain(&self, params: &Value) -> Result<Value, ConnectError> {
        let target = switch_chain_target(params)?;
        if !self.supported.contains(&target) {
            return Err(ConnectError::Rpc(RpcError::new(
                RpcError::UNRECOGNIZED_CHAIN,
                "Thirdweb: unsupported chain",
            )));
        }
        self.bind(target)?;
        tracing::info!(chain_id = %target, "thirdweb switched chain");
        self.events.emit(&ConnectorEvent::ChainChanged(target));
        Ok(Value::Null)
    }
}

struct ThirdwebRequestProxy {
    shared: Arc<ThirdwebShared>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RequestTransport for ThirdwebRequestProxy {
    async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        if args.method == "wallet_switchEthereumChain" {
            return self.shared.switch_chain(&args.params);
        }
        NormalizedProvider::adapt(self.shared.inner()?).request(args).await
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for ThirdwebConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Thirdweb
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        self.shared.supported.clone()
    }

    fn teardown(&self) -> Teardown {
        Teardown::Close
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                let account = match self.shared.sdk.auto_connect(&self.client_id).await {
                    Ok(Some(account)) => account,
                    Ok(None) => return Err(ConnectError::NotConnected(NO_SESSION.to_owned())),
                    Err(e) => {
                        tracing::debug!(error = %e, "thirdweb auto connect failed");
                        return Err(ConnectError::NotConnected(NO_SESSION.to_owned()));
                    }
                };
                let chain_id = self.shared.current_chain();
                self.shared.bind(chain_id)?;
                Ok(ConnectorUpdate {
                    provider: self.provider().await?,
                    account: Some(account),
                    chain_id: Some(chain_id),
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        self.shared.inner()?;
        Ok(RawProvider::modern(Arc::new(ThirdwebRequestProxy {
            shared: Arc::clone(&self.shared),
        }))
        .with_flag("isDapper", false)
        .with_flag("isFortmatic", false)
        .with_flag("isMetamask", false)
        .with_flag("isMagic", false)
        .with_flag("isThirdweb", true))
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        Ok(self.shared.current_chain())
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        Ok(self.shared.sdk.account())
    }

    fn deactivate(&self) {
        self.lifecycle.deactivate();
    }

    async fn close(&self) -> Result<(), ConnectError> {
        let result = self.shared.sdk.disconnect().await;
        if let Ok(mut g) = self.shared.inner.lock() {
            g.take();
        }
        result
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.shared.events.subscribe(listener)
    }
}
