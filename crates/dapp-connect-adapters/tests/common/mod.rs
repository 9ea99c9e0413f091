#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use tiny_http::{Response, Server, StatusCode};

use dapp_connect_adapters::sdk::{
    CompanionOpener, FortmaticLoader, FortmaticSdk, MagicClient, MagicSdk, RelayChannel,
    RelayInitOptions, RelayOutcome, RelayRequest, RelayRequestResponse, RelaySdk, RelaySession,
    RelayTransport, ThirdwebSdk, WalletLinkProvider, WalletLinkSdk,
};
use dapp_connect_core::{
    ChainId, ConnectError, EventEmitter, EventListener, ProviderEvents, RawProvider,
    RawProviderEvent, RequestArguments, RequestTransport, RpcError, Subscription,
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

pub fn other_account() -> Address {
    "0x2000000000000000000000000000000000000002"
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

    pub fn wallet(account: Address, chain_hex: &str) -> Arc<Self> {
        let provider = Self::with("eth_requestAccounts", json!([account.to_string()]));
        provider.respond("eth_accounts", json!([account.to_string()]));
        provider.respond("eth_chainId", json!(chain_hex));
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

/// Never answers; a locked wallet.
pub struct SilentProvider;

#[async_trait]
impl RequestTransport for SilentProvider {
    async fn request(&self, _args: RequestArguments) -> Result<Value, ConnectError> {
        futures::future::pending().await
    }
}

/// Always fails with the configured error.
pub struct FailingProvider(pub ConnectError);

#[async_trait]
impl RequestTransport for FailingProvider {
    async fn request(&self, _args: RequestArguments) -> Result<Value, ConnectError> {
        Err(self.0.clone())
    }
}

/// `provider.on(...)` backed by an emitter the test fires by hand.
#[derive(Default)]
pub struct FakeEvents {
    emitter: EventEmitter<RawProviderEvent>,
}

impl FakeEvents {
    pub fn fire(&self, event: RawProviderEvent) {
        self.emitter.emit(&event);
    }

    pub fn listener_count(&self) -> usize {
        self.emitter.listener_count()
    }
}

impl ProviderEvents for FakeEvents {
    fn on(&self, listener: EventListener<RawProviderEvent>) -> Subscription {
        self.emitter.subscribe(listener)
    }
}

pub fn raw_with_events(provider: Arc<ScriptedProvider>, events: Arc<FakeEvents>) -> RawProvider {
    RawProvider::modern(provider).with_events(events)
}

// ---- relay (WalletConnect v2) ----

pub struct FakeRelaySession {
    pub provider: Arc<ScriptedProvider>,
    pub events: Arc<FakeEvents>,
    pub chain_id: ChainId,
    pub peer: Option<String>,
    pub enable_errors: Mutex<VecDeque<ConnectError>>,
    pub enables: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub disconnect_error: Option<ConnectError>,
}

impl FakeRelaySession {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            provider: ScriptedProvider::wallet(account(), &chain_id.to_hex()),
            events: Arc::new(FakeEvents::default()),
            chain_id,
            peer: Some("Rainbow".to_owned()),
            enable_errors: Mutex::new(VecDeque::new()),
            enables: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            disconnect_error: None,
        }
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySession for FakeRelaySession {
    async fn enable(&self) -> Result<Vec<Address>, ConnectError> {
        self.enables.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.enable_errors.lock().expect("errors lock").pop_front() {
            return Err(err);
        }
        Ok(vec![account()])
    }

    fn raw(&self) -> RawProvider {
        raw_with_events(Arc::clone(&self.provider), Arc::clone(&self.events))
    }

    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    fn accounts(&self) -> Vec<Address> {
        vec![account()]
    }

    fn peer_name(&self) -> Option<String> {
        self.peer.clone()
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        match &self.disconnect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Hands out the same session on every `init`, after popping any scripted
/// init failures.
pub struct FakeRelaySdk {
    pub session: Arc<FakeRelaySession>,
    pub init_errors: Mutex<VecDeque<ConnectError>>,
    pub inits: AtomicUsize,
    pub options: Mutex<Vec<RelayInitOptions>>,
    /// Delays `init` so overlapping activations can be observed.
    pub init_delay: Option<std::time::Duration>,
}

impl FakeRelaySdk {
    pub fn new(session: FakeRelaySession) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::new(session),
            init_errors: Mutex::new(VecDeque::new()),
            inits: AtomicUsize::new(0),
            options: Mutex::new(Vec::new()),
            init_delay: None,
        })
    }

    pub fn delayed(session: FakeRelaySession, delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            session: Arc::new(session),
            init_errors: Mutex::new(VecDeque::new()),
            inits: AtomicUsize::new(0),
            options: Mutex::new(Vec::new()),
            init_delay: Some(delay),
        })
    }

    pub fn fail_init(&self, err: ConnectError) {
        self.init_errors.lock().expect("errors lock").push_back(err);
    }

    pub fn fail_enable(&self, err: ConnectError) {
        self.session
            .enable_errors
            .lock()
            .expect("errors lock")
            .push_back(err);
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySdk for FakeRelaySdk {
    async fn init(&self, options: RelayInitOptions) -> Result<Arc<dyn RelaySession>, ConnectError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.options.lock().expect("options lock").push(options);
        if let Some(delay) = self.init_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.init_errors.lock().expect("errors lock").pop_front() {
            return Err(err);
        }
        let session: Arc<dyn RelaySession> = self.session.clone();
        Ok(session)
    }
}

// ---- magic ----

pub struct FakeMagicClient {
    pub chain_id: ChainId,
    pub logged_in: bool,
    pub provider: Arc<ScriptedProvider>,
    pub logouts: AtomicUsize,
}

#[async_trait]
impl MagicClient for FakeMagicClient {
    async fn is_logged_in(&self) -> Result<bool, ConnectError> {
        Ok(self.logged_in)
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(RawProvider::modern(self.provider.clone()))
    }

    async fn logout(&self) -> Result<(), ConnectError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMagicSdk {
    pub logged_in: bool,
    /// Chains whose client build fails.
    pub broken_chains: Vec<ChainId>,
    pub built: Mutex<Vec<(String, Option<String>, ChainId)>>,
    pub clients: Mutex<Vec<Arc<FakeMagicClient>>>,
}

impl FakeMagicSdk {
    pub fn logged_in() -> Arc<Self> {
        Arc::new(Self {
            logged_in: true,
            ..Self::default()
        })
    }

    pub fn built_chains(&self) -> Vec<ChainId> {
        self.built
            .lock()
            .expect("built lock")
            .iter()
            .map(|(_, _, chain)| *chain)
            .collect()
    }

    pub fn last_client(&self) -> Arc<FakeMagicClient> {
        self.clients
            .lock()
            .expect("clients lock")
            .last()
            .cloned()
            .expect("a client was built")
    }
}

#[async_trait]
impl MagicSdk for FakeMagicSdk {
    async fn build(
        &self,
        api_key: &str,
        rpc_url: Option<&str>,
        chain_id: ChainId,
    ) -> Result<Arc<dyn MagicClient>, ConnectError> {
        self.built.lock().expect("built lock").push((
            api_key.to_owned(),
            rpc_url.map(str::to_owned),
            chain_id,
        ));
        if self.broken_chains.contains(&chain_id) {
            return Err(ConnectError::Transport("magic network unavailable".to_owned()));
        }
        let client = Arc::new(FakeMagicClient {
            chain_id,
            logged_in: self.logged_in,
            provider: ScriptedProvider::wallet(account(), &chain_id.to_hex()),
            logouts: AtomicUsize::new(0),
        });
        self.clients
            .lock()
            .expect("clients lock")
            .push(Arc::clone(&client));
        Ok(client)
    }
}

// ---- fortmatic ----

pub struct FakeFortmatic {
    pub provider: Arc<ScriptedProvider>,
    pub logouts: AtomicUsize,
}

#[async_trait]
impl FortmaticSdk for FakeFortmatic {
    fn provider(&self) -> RawProvider {
        RawProvider::modern(self.provider.clone())
    }

    async fn enable(&self) -> Result<Vec<Address>, ConnectError> {
        Ok(vec![account()])
    }

    async fn logout(&self) -> Result<(), ConnectError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeFortmaticLoader {
    pub sdk: Arc<FakeFortmatic>,
    pub loads: Mutex<Vec<(String, Option<String>, ChainId)>>,
}

impl Default for FakeFortmaticLoader {
    fn default() -> Self {
        Self {
            sdk: Arc::new(FakeFortmatic {
                provider: ScriptedProvider::wallet(account(), "0x1"),
                logouts: AtomicUsize::new(0),
            }),
            loads: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FortmaticLoader for FakeFortmaticLoader {
    async fn load(
        &self,
        api_key: &str,
        rpc_url: Option<&str>,
        chain_id: ChainId,
    ) -> Result<Arc<dyn FortmaticSdk>, ConnectError> {
        self.loads.lock().expect("loads lock").push((
            api_key.to_owned(),
            rpc_url.map(str::to_owned),
            chain_id,
        ));
        let sdk: Arc<dyn FortmaticSdk> = self.sdk.clone();
        Ok(sdk)
    }
}

// ---- wallet link ----

pub struct FakeWalletLinkProvider {
    pub provider: Arc<ScriptedProvider>,
    pub events: Arc<FakeEvents>,
    pub closes: AtomicUsize,
    /// Listener count observed at the moment `close` ran.
    pub listeners_at_close: Mutex<Option<usize>>,
}

#[async_trait]
impl WalletLinkProvider for FakeWalletLinkProvider {
    fn raw(&self) -> RawProvider {
        raw_with_events(Arc::clone(&self.provider), Arc::clone(&self.events))
    }

    async fn close(&self) -> Result<(), ConnectError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        *self.listeners_at_close.lock().expect("close lock") = Some(self.events.listener_count());
        Ok(())
    }
}

pub struct FakeWalletLinkSdk {
    pub provider: Arc<FakeWalletLinkProvider>,
    pub made: Mutex<Vec<(String, Option<String>, ChainId)>>,
}

impl Default for FakeWalletLinkSdk {
    fn default() -> Self {
        Self {
            provider: Arc::new(FakeWalletLinkProvider {
                provider: ScriptedProvider::wallet(account(), "0x1"),
                events: Arc::new(FakeEvents::default()),
                closes: AtomicUsize::new(0),
                listeners_at_close: Mutex::new(None),
            }),
            made: Mutex::new(Vec::new()),
        }
    }
}

impl WalletLinkSdk for FakeWalletLinkSdk {
    fn make_web3_provider(
        &self,
        app_name: &str,
        rpc_url: Option<&str>,
        chain_id: ChainId,
    ) -> Result<Arc<dyn WalletLinkProvider>, ConnectError> {
        self.made.lock().expect("made lock").push((
            app_name.to_owned(),
            rpc_url.map(str::to_owned),
            chain_id,
        ));
        let provider: Arc<dyn WalletLinkProvider> = self.provider.clone();
        Ok(provider)
    }
}

// ---- thirdweb ----

#[derive(Default)]
pub struct FakeThirdweb {
    pub session: Option<Address>,
    pub bound: Mutex<Vec<ChainId>>,
    pub disconnects: AtomicUsize,
}

impl FakeThirdweb {
    pub fn signed_in() -> Arc<Self> {
        Arc::new(Self {
            session: Some(account()),
            ..Self::default()
        })
    }

    pub fn bound(&self) -> Vec<ChainId> {
        self.bound.lock().expect("bound lock").clone()
    }
}

#[async_trait]
impl ThirdwebSdk for FakeThirdweb {
    async fn auto_connect(&self, _client_id: &str) -> Result<Option<Address>, ConnectError> {
        Ok(self.session)
    }

    fn to_provider(&self, chain_id: ChainId) -> Result<RawProvider, ConnectError> {
        self.bound.lock().expect("bound lock").push(chain_id);
        Ok(RawProvider::modern(ScriptedProvider::wallet(
            account(),
            &chain_id.to_hex(),
        )))
    }

    fn account(&self) -> Option<Address> {
        self.session
    }

    async fn disconnect(&self) -> Result<(), ConnectError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---- auth relay ----

/// Scripted relay channel. Outcomes queue up front; an empty queue never
/// resolves, the way a silent companion app would.
pub struct FakeRelayChannel {
    pub ack: RelayRequestResponse,
    pub outcomes: Mutex<VecDeque<RelayOutcome>>,
    pub requests: Mutex<Vec<RelayRequest>>,
    pub disconnects: AtomicUsize,
}

impl FakeRelayChannel {
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RelayRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl RelayChannel for FakeRelayChannel {
    async fn request(&self, request: RelayRequest) -> Result<RelayRequestResponse, ConnectError> {
        self.requests.lock().expect("requests lock").push(request);
        Ok(self.ack.clone())
    }

    async fn next_outcome(&self) -> Result<RelayOutcome, ConnectError> {
        let next = self.outcomes.lock().expect("outcomes lock").pop_front();
        match next {
            Some(outcome) => Ok(outcome),
            None => futures::future::pending().await,
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeRelayTransport {
    pub channel: Arc<FakeRelayChannel>,
    pub urls: Mutex<Vec<String>>,
}

impl FakeRelayTransport {
    pub fn new(ack: RelayRequestResponse, outcomes: Vec<RelayOutcome>) -> Arc<Self> {
        Arc::new(Self {
            channel: Arc::new(FakeRelayChannel {
                ack,
                outcomes: Mutex::new(outcomes.into()),
                requests: Mutex::new(Vec::new()),
                disconnects: AtomicUsize::new(0),
            }),
            urls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RelayTransport for FakeRelayTransport {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayChannel>, ConnectError> {
        self.urls.lock().expect("urls lock").push(url.to_owned());
        let channel: Arc<dyn RelayChannel> = self.channel.clone();
        Ok(channel)
    }
}

#[derive(Default)]
pub struct RecordingOpener {
    pub opened: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock").clone()
    }
}

impl CompanionOpener for RecordingOpener {
    fn open(&self, url: &str) {
        self.opened.lock().expect("opened lock").push(url.to_owned());
    }
}

pub fn ack(request_id: &str, expires_in: chrono::Duration) -> RelayRequestResponse {
    RelayRequestResponse {
        request_id: request_id.to_owned(),
        expiration: Some(chrono::Utc::now() + expires_in),
        code: Some(42),
        error: None,
    }
}

pub fn outcome(request_id: &str, sender: Address, result: Value) -> RelayOutcome {
    RelayOutcome {
        request_id: request_id.to_owned(),
        sender: Some(sender.to_string()),
        result: Some(result),
        error: None,
    }
}

// ---- JSON-RPC over HTTP ----

/// Answers JSON-RPC POSTs from a method -> result table and records each
/// method it saw. Unknown methods get a JSON-RPC error body.
pub fn spawn_rpc_server(
    results: HashMap<String, Value>,
    calls: Arc<Mutex<Vec<String>>>,
) -> (String, thread::JoinHandle<()>) {
    let server = Server::http("127.0.0.1:0").expect("start server");
    let addr = format!("http://{}", server.server_addr());

    let join = thread::spawn(move || {
        for _ in 0..16 {
            let mut req = match server.recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            let mut body = String::new();
            let _ = req.as_reader().read_to_string(&mut body);
            let envelope: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            let method = envelope
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            if let Ok(mut g) = calls.lock() {
                g.push(method.clone());
            }

            let id = envelope.get("id").cloned().unwrap_or(Value::Null);
            let (code, payload) = match (method.as_str(), results.get(&method)) {
                ("http_500", _) => (500, json!({"message": "internal"})),
                (_, Some(result)) => (200, json!({"jsonrpc": "2.0", "id": id, "result": result})),
                (_, None) => (
                    200,
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "method not found"}
                    }),
                ),
            };
            let response = Response::from_string(payload.to_string())
                .with_status_code(StatusCode(code));
            let _ = req.respond(response);
        }
    });

    (addr, join)
}
