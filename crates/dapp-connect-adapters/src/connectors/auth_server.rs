//! Remote signing through the Decentraland auth server.
//!
//! Sign-in happens in two phases so the host can show the verification code
//! before the companion app opens: [`AuthServerSignIn::init_sign_in`] submits
//! an ephemeral-key authorization request, [`AuthServerSignIn::finish_sign_in`]
//! opens the companion app and waits for the signed outcome. The resulting
//! identity is persisted and later restored by [`AuthServerConnector`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{hex, Address, B256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use dapp_connect_core::rpc::switch_chain_target;
use dapp_connect_core::timer::race_timeout;
use dapp_connect_core::{
    ChainId, ConnectError, Connector, ConnectorEvent, ConnectorUpdate, EventEmitter,
    EventListener, Lifecycle, ProviderKind, RawProvider, RequestArguments, RequestTransport,
    SessionRegistry, Storage, Subscription,
};

use super::AuthServerBackend;
use crate::configuration::AuthServerConfiguration;
use crate::rpc_client::HttpJsonRpc;
use crate::sdk::{RelayChannel, RelayOutcome, RelayRequest, RelayRequestResponse};

/// Storage key holding the address of the last signed-in account.
pub const PREVIOUS_ADDRESS_KEY: &str = "auth-server-previous-address";

const SIGN_IN_METHOD: &str = "dcl_personal_sign";

/// Served by a plain RPC node, never by the companion app.
const READ_ONLY_METHODS: [&str; 16] = [
    "eth_blockNumber",
    "eth_call",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getCode",
    "eth_getLogs",
    "eth_getStorageAt",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_maxPriorityFeePerGas",
    "net_listening",
];

/// Personal-sign signatures are 65 bytes (`0x` + 130 hex chars); anything
/// else came from a contract wallet.
const PERSONAL_SIGNATURE_LEN: usize = 132;

pub fn identity_key(address: Address) -> String {
    format!("single-sign-on-{}", address.to_string().to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthLinkType {
    #[serde(rename = "SIGNER")]
    Signer,
    #[serde(rename = "ECDSA_EPHEMERAL")]
    EcdsaPersonalEphemeral,
    #[serde(rename = "ECDSA_EIP_1654_EPHEMERAL")]
    EcdsaEip1654Ephemeral,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLink {
    #[serde(rename = "type")]
    pub link_type: AuthLinkType,
    pub payload: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralIdentity {
    pub address: String,
    pub private_key: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthIdentity {
    pub expiration: DateTime<Utc>,
    pub ephemeral_identity: EphemeralIdentity,
    pub auth_chain: Vec<AuthLink>,
}

impl AuthIdentity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Relay round-trips shared by sign-in and signing requests.
#[derive(Clone)]
struct AuthRelay {
    backend: AuthServerBackend,
    config: AuthServerConfiguration,
}

impl AuthRelay {
    async fn open(&self) -> Result<Arc<dyn RelayChannel>, ConnectError> {
        if self.config.server_url.is_empty() {
            return Err(ConnectError::Configuration(
                "auth server url is not configured".to_owned(),
            ));
        }
        self.backend.transport.connect(&self.config.server_url).await
    }

    async fn submit(
        &self,
        channel: &Arc<dyn RelayChannel>,
        request: RelayRequest,
    ) -> Result<RelayRequestResponse, ConnectError> {
        let response = channel.request(request).await?;
        if let Some(error) = response.error.clone() {
            channel.disconnect();
            return Err(ConnectError::Transport(error));
        }
        Ok(response)
    }

    fn open_companion(&self, response: &RelayRequestResponse) {
        let url = format!(
            "{}/requests/{}",
            self.config.dapp_url.trim_end_matches('/'),
            response.request_id
        );
        tracing::debug!(%url, "opening companion app");
        self.backend.opener.open(&url);
    }

    /// Races the matching outcome against the request's own expiration.
    async fn await_outcome(
        &self,
        channel: &Arc<dyn RelayChannel>,
        response: &RelayRequestResponse,
    ) -> Result<RelayOutcome, ConnectError> {
        let expiration = response.expiration.ok_or_else(|| {
            ConnectError::Validation("relay acknowledgement has no expiration".to_owned())
        })?;
        let remaining = (expiration - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        let outcome = race_timeout(wait_for(channel.as_ref(), &response.request_id), remaining).await;
        channel.disconnect();

        let outcome = match outcome {
            Some(outcome) => outcome?,
            None => {
                tracing::warn!(request_id = %response.request_id, "auth relay request expired");
                return Err(ConnectError::Timeout("Timeout".to_owned()));
            }
        };
        if let Some(err) = &outcome.error {
            return Err(ConnectError::UserRejected(err.message.clone()));
        }
        Ok(outcome)
    }

    async fn round_trip(&self, request: RelayRequest) -> Result<RelayOutcome, ConnectError> {
        let channel = self.open().await?;
        let response = self.submit(&channel, request).await?;
        self.open_companion(&response);
        self.await_outcome(&channel, &response).await
    }
}

async fn wait_for(channel: &dyn RelayChannel, request_id: &str) -> Result<RelayOutcome, ConnectError> {
    loop {
        let outcome = channel.next_outcome().await?;
        if outcome.request_id == request_id {
            return Ok(outcome);
        }
    }
}

fn ephemeral_signer() -> Result<PrivateKeySigner, ConnectError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| ConnectError::Transport(format!("ephemeral key generation failed: {e}")))?;
    PrivateKeySigner::from_bytes(&B256::from(bytes))
        .map_err(|e| ConnectError::Transport(format!("invalid ephemeral key: {e}")))
}

pub fn ephemeral_message(address: Address, expiration: DateTime<Utc>) -> String {
    format!(
        "Decentraland Login\nEphemeral address: {address}\nExpiration: {}",
        expiration.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Output of the first sign-in phase.
pub struct SignInChallenge {
    channel: Arc<dyn RelayChannel>,
    signer: PrivateKeySigner,
    expiration: DateTime<Utc>,
    message: String,
    response: RelayRequestResponse,
}

impl SignInChallenge {
    pub fn request_id(&self) -> &str {
        &self.response.request_id
    }

    /// Verification code to show before opening the companion app.
    pub fn code(&self) -> Option<i64> {
        self.response.code
    }

    pub fn request_expiration(&self) -> Option<DateTime<Utc>> {
        self.response.expiration
    }

    pub fn identity_expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    pub fn ephemeral_message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedIn {
    pub address: Address,
    pub identity: AuthIdentity,
}

pub struct AuthServerSignIn {
    relay: AuthRelay,
    storage: Arc<dyn Storage>,
    identity_ttl: Duration,
}

impl AuthServerSignIn {
    pub fn new(
        backend: AuthServerBackend,
        config: AuthServerConfiguration,
        storage: Arc<dyn Storage>,
        identity_ttl: Duration,
    ) -> Self {
        Self {
            relay: AuthRelay { backend, config },
            storage,
            identity_ttl,
        }
    }

    pub async fn init_sign_in(&self) -> Result<SignInChallenge, ConnectError> {
        let channel = self.relay.open().await?;
        let signer = ephemeral_signer()?;
        let ttl = chrono::Duration::from_std(self.identity_ttl)
            .map_err(|e| ConnectError::Configuration(format!("identity ttl out of range: {e}")))?;
        let expiration = Utc::now() + ttl;
        let message = ephemeral_message(signer.address(), expiration);

        let response = self
            .relay
            .submit(
                &channel,
                RelayRequest {
                    method: SIGN_IN_METHOD.to_owned(),
                    params: json!([message]),
                },
            )
            .await?;
        tracing::info!(request_id = %response.request_id, "auth server sign-in requested");

        Ok(SignInChallenge {
            channel,
            signer,
            expiration,
            message,
            response,
        })
    }

    /// Opens the companion app, waits for the signature and persists the
    /// identity under the signer's address.
    pub async fn finish_sign_in(&self, challenge: SignInChallenge) -> Result<SignedIn, ConnectError> {
        self.relay.open_companion(&challenge.response);
        let outcome = self
            .relay
            .await_outcome(&challenge.channel, &challenge.response)
            .await?;

        let sender = outcome.sender.clone().ok_or_else(|| {
            ConnectError::Validation("sign-in outcome has no sender".to_owned())
        })?;
        let address: Address = sender
            .parse()
            .map_err(|e| ConnectError::Validation(format!("invalid signer address {sender}: {e}")))?;
        let signature = outcome
            .result
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectError::Validation("sign-in outcome has no signature".to_owned()))?
            .to_owned();

        let identity = build_identity(&challenge, sender.clone(), signature);
        let raw = serde_json::to_string(&identity)
            .map_err(|e| ConnectError::Validation(format!("identity serialization failed: {e}")))?;
        self.storage.set(&identity_key(address), &raw);
        self.storage.set(PREVIOUS_ADDRESS_KEY, &sender);
        tracing::info!(%address, "auth server sign-in complete");

        Ok(SignedIn { address, identity })
    }
}

fn build_identity(challenge: &SignInChallenge, sender: String, signature: String) -> AuthIdentity {
    let signer = &challenge.signer;
    let public_key = signer.credential().verifying_key().to_encoded_point(false);
    let link_type = if signature.len() == PERSONAL_SIGNATURE_LEN {
        AuthLinkType::EcdsaPersonalEphemeral
    } else {
        AuthLinkType::EcdsaEip1654Ephemeral
    };
    AuthIdentity {
        expiration: challenge.expiration,
        ephemeral_identity: EphemeralIdentity {
            address: signer.address().to_string(),
            private_key: signer.to_bytes().to_string(),
            public_key: hex::encode_prefixed(public_key.as_bytes()),
        },
        auth_chain: vec![
            AuthLink {
                link_type: AuthLinkType::Signer,
                payload: sender,
                signature: String::new(),
            },
            AuthLink {
                link_type,
                payload: challenge.message.clone(),
                signature,
            },
        ],
    }
}

/// Virtual signer: answers identity queries locally, reads through a plain
/// RPC node and sends everything else to the companion app.
pub struct AuthServerProvider {
    relay: AuthRelay,
    registry: Arc<SessionRegistry>,
    rpc_urls: BTreeMap<ChainId, String>,
    rpc_timeout: Duration,
    client: reqwest::Client,
    chain_id: Mutex<ChainId>,
    account: Mutex<Option<Address>>,
    events: EventEmitter<ConnectorEvent>,
}

impl AuthServerProvider {
    pub fn new(
        backend: AuthServerBackend,
        config: AuthServerConfiguration,
        rpc_urls: BTreeMap<ChainId, String>,
        chain_id: ChainId,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            relay: AuthRelay { backend, config },
            registry: SessionRegistry::global(),
            rpc_urls,
            rpc_timeout,
            client: reqwest::Client::new(),
            chain_id: Mutex::new(chain_id),
            account: Mutex::new(None),
            events: EventEmitter::default(),
        }
    }

    /// Replaces the process-wide registry holding the signing latch.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn chain_id(&self) -> ChainId {
        match self.chain_id.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn account(&self) -> Option<Address> {
        match self.account.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_account(&self, account: Option<Address>) {
        if let Ok(mut g) = self.account.lock() {
            *g = account;
        }
    }

    fn set_chain(&self, chain_id: ChainId) -> Result<(), ConnectError> {
        *self
            .chain_id
            .lock()
            .map_err(|e| ConnectError::lock_poisoned("auth server chain", e))? = chain_id;
        Ok(())
    }

    async fn read_only(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        let chain_id = self.chain_id();
        let url = self.rpc_urls.get(&chain_id).ok_or_else(|| {
            ConnectError::Configuration(format!("no RPC url configured for chain {chain_id}"))
        })?;
        HttpJsonRpc::with_client(self.client.clone(), url.clone(), self.rpc_timeout)
            .request(args)
            .await
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RequestTransport for AuthServerProvider {
    async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        match args.method.as_str() {
            "eth_chainId" => Ok(json!(self.chain_id().to_hex())),
            "net_version" => Ok(json!(self.chain_id().0.to_string())),
            "eth_accounts" | "eth_requestAccounts" => Ok(match self.account() {
                Some(account) => json!([account.to_string()]),
                None => json!([]),
            }),
            "wallet_switchEthereumChain" => {
                let target = switch_chain_target(&args.params)?;
                self.set_chain(target)?;
                self.events.emit(&ConnectorEvent::ChainChanged(target));
                Ok(Value::Null)
            }
            method if READ_ONLY_METHODS.contains(&method) => self.read_only(args).await,
            method => {
                // One companion window at a time.
                let _latch = self.registry.begin_enable(ProviderKind::AuthServer)?;
                tracing::debug!(%method, "forwarding request to the companion app");
                let outcome = self
                    .relay
                    .round_trip(RelayRequest {
                        method: method.to_owned(),
                        params: args.params_or_empty(),
                    })
                    .await?;
                Ok(outcome.result.unwrap_or(Value::Null))
            }
        }
    }
}

/// Restores the identity persisted by a previous sign-in.
pub struct AuthServerConnector {
    provider: Arc<AuthServerProvider>,
    storage: Arc<dyn Storage>,
    lifecycle: Lifecycle,
}

impl AuthServerConnector {
    pub fn new(provider: AuthServerProvider, storage: Arc<dyn Storage>) -> Self {
        Self {
            provider: Arc::new(provider),
            storage,
            lifecycle: Lifecycle::new(ProviderKind::AuthServer),
        }
    }

    fn restore_account(&self) -> Option<Address> {
        let previous = self.storage.get(PREVIOUS_ADDRESS_KEY)?;
        let address: Address = previous.parse().ok()?;
        let raw = self.storage.get(&identity_key(address))?;
        let identity: AuthIdentity = match serde_json::from_str(&raw) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(%address, error = %e, "ignoring malformed stored identity");
                return None;
            }
        };
        if identity.is_expired(Utc::now()) {
            tracing::info!(%address, "stored identity has expired");
            return None;
        }
        Some(address)
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl Connector for AuthServerConnector {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AuthServer
    }

    fn supported_chain_ids(&self) -> Vec<ChainId> {
        self.provider.rpc_urls.keys().copied().collect()
    }

    async fn activate(&self) -> Result<ConnectorUpdate, ConnectError> {
        self.lifecycle
            .activate(async {
                let account = self.restore_account().ok_or_else(|| {
                    ConnectError::NotConnected(
                        "Cannot activate the Auth Server Connector".to_owned(),
                    )
                })?;
                self.provider.set_account(Some(account));
                Ok(ConnectorUpdate {
                    provider: RawProvider::modern(self.provider.clone()),
                    account: Some(account),
                    chain_id: Some(self.provider.chain_id()),
                })
            })
            .await
    }

    async fn provider(&self) -> Result<RawProvider, ConnectError> {
        Ok(RawProvider::modern(self.provider.clone()))
    }

    async fn chain_id(&self) -> Result<ChainId, ConnectError> {
        Ok(self.provider.chain_id())
    }

    async fn account(&self) -> Result<Option<Address>, ConnectError> {
        Ok(self.provider.account())
    }

    fn deactivate(&self) {
        self.provider.set_account(None);
        self.lifecycle.deactivate();
    }

    fn subscribe(&self, listener: EventListener<ConnectorEvent>) -> Subscription {
        self.provider.events.subscribe(listener)
    }
}
