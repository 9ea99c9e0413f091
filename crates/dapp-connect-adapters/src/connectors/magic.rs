use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};

use dapp_connect_core::rpc::{parse_accounts, switch_chain_target};
use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, NormalizedProvider, ProviderKind, RawProvider, RequestArguments,
    RequestTransport, RpcError, Subscription, Teardown,
};

use crate::configuration::MagicConfiguration;
use crate::sdk::{MagicClient, MagicSdk};

pub const MAGIC_UNSUPPORTED_CHAIN: i64 = 2_020_202;
pub const MAGIC_SWITCH_FAILED: i64 = 2_020_201;

/// Custodial email wallet. The user must already be logged in; this layer
/// drives no login UI.
pub struct MagicConnector {
    shared: Arc<MagicShared>,
    lifecycle: Lifecycle,
}

struct MagicShared {
    kind: ProviderKind,
    sdk: Arc<dyn MagicSdk>,
    config: MagicConfiguration,
    chain_id: Mutex<ChainId>,
    account: Mutex<Option<Address>>,
    client: Mutex<Option<Arc<dyn MagicClient>>>,
    events: EventEmitter<ConnectorEvent>,
}

impl MagicConnector {
    /// `test` selects the `magic_test` credentials; the kind reported is
    /// [`ProviderKind::MagicTest`] in that case.
    pub fn new(
        config: &MagicConfiguration,
        chain_id: ChainId,
        sdk: Arc<dyn MagicSdk>,
        test: bool,
    ) -> Result<Self, ConnectError> {
        if config.api_key.is_empty() {
            return Err(ConnectError::Configuration(
                "Magic: apiKey is not configured".to_owned(),
            ));
        }
        let kind = if test {
            ProviderKind::MagicTest
        } else {
            ProviderKind::Magic
        };
        Ok(Self {
            shared: Arc::new(MagicShared {
                kind,
                sdk,
                config: config.clone(),
                chain_id: Mutex::new(chain_id),
                account: Mutex::new(None),
                client: Mutex::new(None),
                events: EventEmitter::default(),
            }),
            lifecycle: Lifecycle::new(kind),
        })
    }
}

impl MagicShared {
    fn current_chain(&self) -> ChainId {
        match self.chain_id.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn client(&self) -> Result<Arc<dyn MagicClient>, ConnectError> {
        self.client
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("magic client", e))?
            .clone()
            .ok_or_else(|| {
                ConnectError::NotConnected("Magic: instance was not initialized".to_owned())
            })
    }

    async fn build_client(&self, chain_id: ChainId) -> Result<Arc<dyn MagicClient>, ConnectError> {
        let rpc_url = self.config.urls.get(&chain_id).map(String::as_str);
        self.sdk.build(&self.config.api_key, rpc_url, chain_id).await
    }

    fn install(&self, chain_id: ChainId, client: Arc<dyn MagicClient>) -> Result<(), ConnectError> {
        *self
            .client
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("magic client", e))? = Some(client);
        *self
            .chain_id
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("magic chain", e))? = chain_id;
        Ok(())
    }

    /// Answers `wallet_switchEthereumChain` with `null` or an error object;
    /// this path never fails.
    async fn switch_chain(&self, params: &Value) -> Value {
        let target = match switch_chain_target(params) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(error = %e, "malformed magic chain switch");
                return RpcError::new(MAGIC_SWITCH_FAILED, "Error changing the Magic ChainId").to_value();
            }
        };
        if !self.config.chains.contains(&target) {
            return RpcError::new(MAGIC_UNSUPPORTED_CHAIN, "Unsupported Magic ChainId").to_value();
        }
        let rebuilt = match self.build_client(target).await {
            Ok(client) => self.install(target, client),
            Err(e) => Err(e),
        };
        match rebuilt {
            Ok(()) => {
                tracing::info!(kind = %self.kind, chain_id = %target, "magic switched chain");
                self.events.emit(&ConnectorEvent::ChainChanged(target));
                Value::Null
            }
            Err(e) => {
                tracing::warn!(error = %e, chain_id = %target, "magic chain switch failed");
                RpcError::new(MAGIC_SWITCH_FAILED, "Error changing the Magic ChainId").to_value()
            }
        }
    }
}

/// The provider handed to callers: intercepts chain switches, forwards
/// everything else to whichever client is current.
struct MagicRequestProxy {
    shared: Arc<MagicShared>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RequestTransport for MagicRequestProxy {
    async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        if args.method == "wallet_switchEthereumChain" {
            return Ok(self.shared.switch_chain(&args.params).await);
        }
        let raw = self.shared.client()?.provider().await?;
        NormalizedProvider::adapt(raw).request(args).await
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for MagicConnector {
    fn kind(&self) -> ProviderKind {
        self.shared.kind
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        self.shared.config.chains.clone()
    }

    fn teardown(&self) -> Teardown {
        Teardown::Close
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                let chain_id = self.shared.current_chain();
                let client = self.shared.build_client(chain_id).await?;
                self.shared.install(chain_id, Arc::clone(&client))?;
                if !client.is_logged_in().await? {
                    return Err(ConnectError::NotConnected(
                        "Magic: user isn't logged in".to_owned(),
                    ));
                }
                let provider = self.provider().await?;
                let accounts = NormalizedProvider::adapt(provider.clone())
                    .request_method("eth_accounts", json!([]))
                    .await?;
                let account = parse_accounts(&accounts)?.first().copied();
                *self
                    .shared
                    .account
                    .lock()
                    .map_err(|e| ConnectError::lock_poisoned("magic account", e))? = account;
                Ok(ConnectorUpdate {
                    provider,
                    account,
                    chain_id: Some(chain_id),
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        self.shared.client()?;
        Ok(RawProvider::modern(Arc::new(MagicRequestProxy {
            shared: Arc::clone(&self.shared),
        }))
        .with_flag("isMagic", true))
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        self.shared.client()?;
        Ok(self.shared.current_chain())
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        self.shared.client()?;
        Ok(*self
            .shared
            .account
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("magic account", e))?)
    }

    fn deactivate(&self) {
        self.lifecycle.deactivate();
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.shared.client()?.logout().await
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.shared.events.subscribe(listener)
    }
}
