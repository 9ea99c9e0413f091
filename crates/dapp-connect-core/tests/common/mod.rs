#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::Value;

use dapp_connect_core::{
    CallbackTransport, ChainId, ConnectConfig, ConnectError, ConnectionManager, Connector,
    ConnectorEvent, ConnectorFactory, ConnectorUpdate, EventEmitter, EventListener,
    JsonRpcRequest, MemoryStorage, ProviderKind, RawProvider, RequestArguments,
    RequestTransport, RpcCallback, RpcError, Subscription, Teardown,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn account() -> Address {
    "0x1000000000000000000000000000000000000001"
        .parse()
        .expect("valid account")
}

/// Modern provider answering from a method -> result table.
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<HashMap<String, Value>>,
    pub calls: Mutex<Vec<RequestArguments>>,
}

impl ScriptedProvider {
    pub fn with(method: &str, result: Value) -> Arc<Self> {
        let provider = Arc::new(Self::default());
        provider.respond(method, result);
        provider
    }

    pub fn respond(&self, method: &str, result: Value) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(method.to_owned(), result);
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|c| c.method.clone())
            .collect()
    }
}

#[async_trait]
impl RequestTransport for ScriptedProvider {
    async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        self.calls.lock().expect("calls lock").push(args.clone());
        self.responses
            .lock()
            .expect("responses lock")
            .get(&args.method)
            .cloned()
            .ok_or_else(|| {
                ConnectError::Rpc(RpcError::new(
                    RpcError::UNSUPPORTED_METHOD,
                    format!("unsupported method {}", args.method),
                ))
            })
    }
}

/// Callback-style provider that records every envelope it receives.
#[derive(Default)]
pub struct LegacyProvider {
    pub envelopes: Mutex<Vec<JsonRpcRequest>>,
    pub fail_with: Mutex<Option<ConnectError>>,
    pub bare_results: bool,
}

impl LegacyProvider {
    pub fn ids(&self) -> Vec<Value> {
        self.envelopes
            .lock()
            .expect("envelopes lock")
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }
}

impl CallbackTransport for LegacyProvider {
    fn send(&self, payload: JsonRpcRequest, callback: RpcCallback) {
        self.envelopes
            .lock()
            .expect("envelopes lock")
            .push(payload.clone());
        if let Some(err) = self.fail_with.lock().expect("fail lock").clone() {
            callback(Err(err));
            return;
        }
        let result = serde_json::json!(format!("{}-result", payload.method));
        if self.bare_results {
            callback(Ok(result));
        } else {
            callback(Ok(serde_json::json!({
                "id": payload.id,
                "jsonrpc": "2.0",
                "result": result,
            })));
        }
    }
}

#[derive(Debug, Default)]
pub struct StubCounters {
    pub activations: AtomicUsize,
    pub deactivations: AtomicUsize,
    pub closes: AtomicUsize,
}

impl StubCounters {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub enum Activation {
    Immediate,
    Delayed(Duration),
    Fail(ConnectError),
}

#[derive(Clone)]
pub struct StubTemplate {
    pub provider: RawProvider,
    pub account: Option<Address>,
    pub reported_chain: Option<ChainId>,
    pub teardown: Teardown,
    pub activation: Activation,
    pub close_error: Option<ConnectError>,
    pub wallet_name: Option<String>,
}

impl Default for StubTemplate {
    fn default() -> Self {
        Self {
            provider: RawProvider::modern(ScriptedProvider::with(
                "eth_chainId",
                serde_json::json!("0x1"),
            )),
            account: Some(account()),
            reported_chain: None,
            teardown: Teardown::FireAndForget,
            activation: Activation::Immediate,
            close_error: None,
            wallet_name: None,
        }
    }
}

pub struct StubConnector {
    kind: ProviderKind,
    chain_id: ChainId,
    template: StubTemplate,
    counters: Arc<StubCounters>,
    events: EventEmitter<ConnectorEvent>,
}

#[async_trait]
impl Connector for StubConnector {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        vec![self.chain_id]
    }

    fn teardown(&self) -> Teardown {
        self.template.teardown
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.counters.activations.fetch_add(1, Ordering::SeqCst);
        match &self.template.activation {
            Activation::Immediate => {}
            Activation::Delayed(d) => tokio::time::sleep(*d).await,
            Activation::Fail(e) => return Err(e.clone()),
        }
        Ok(ConnectorUpdate {
            provider: self.template.provider.clone(),
            account: self.template.account,
            chain_id: self.template.reported_chain,
        })
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(self.template.provider.clone())
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        Ok(self.template.reported_chain.unwrap_or(self.chain_id))
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        Ok(self.template.account)
    }

    fn deactivate(&self) {
        self.counters.deactivations.fetch_add(1, Ordering::SeqCst);
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        match &self.template.close_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.events.subscribe(listener)
    }

    fn wallet_name(&self) -> Option<String> {
        self.template.wallet_name.clone()
    }
}

#[derive(Default)]
pub struct StubFactory {
    pub injected: bool,
    pub template: Mutex<StubTemplate>,
    pub counters: Arc<StubCounters>,
    pub builds: Mutex<Vec<(ProviderKind, ChainId)>>,
    pub emitters: Mutex<Vec<EventEmitter<ConnectorEvent>>>,
}

impl StubFactory {
    pub fn set_template(&self, template: StubTemplate) {
        *self.template.lock().expect("template lock") = template;
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().expect("builds lock").len()
    }

    /// Emits on the most recently built connector.
    pub fn emit_last(&self, event: ConnectorEvent) {
        let emitter = self
            .emitters
            .lock()
            .expect("emitters lock")
            .last()
            .cloned()
            .expect("a connector was built");
        emitter.emit(&event);
    }
}

impl ConnectorFactory for StubFactory {
    fn build(
        &self,
        kind: ProviderKind,
        chain_id: ChainId,
    ) -> Result<Box<dyn Connector>, ConnectError> {
        self.builds
            .lock()
            .expect("builds lock")
            .push((kind, chain_id));
        let events = EventEmitter::default();
        self.emitters
            .lock()
            .expect("emitters lock")
            .push(events.clone());
        Ok(Box::new(StubConnector {
            kind,
            chain_id,
            template: self.template.lock().expect("template lock").clone(),
            counters: Arc::clone(&self.counters),
            events,
        }))
    }

    fn has_injected_wallet(&self) -> bool {
        self.injected
    }

    fn residual_storage_patterns(&self) -> Vec<regex::Regex> {
        vec![regex::Regex::new("^wc@2:").expect("regex")]
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub storage: Arc<MemoryStorage>,
    pub factory: Arc<StubFactory>,
}

pub fn harness() -> Harness {
    harness_with(StubFactory::default())
}

pub fn harness_with(factory: StubFactory) -> Harness {
    init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let factory = Arc::new(factory);
    let manager = ConnectionManager::new(
        storage.clone(),
        factory.clone(),
        ConnectConfig::default(),
    );
    Harness {
        manager,
        storage,
        factory,
    }
}
