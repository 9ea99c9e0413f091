//! Boundaries to the third-party wallet SDKs.
//!
//! Connectors drive these traits and never the SDKs directly, so a host
//! binds the real JavaScript SDKs (or test doubles) once and the connector
//! logic stays the same everywhere.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dapp_connect_core::{ChainId, ConnectError, RawProvider};

/// Lazily loads the Fortmatic SDK. Only called on first activation.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait FortmaticLoader: Send + Sync {
    async fn load(
        &self,
        api_key: &str,
        rpc_url: Option<&str>,
        chain_id: ChainId,
    ) -> Result<Arc<dyn FortmaticSdk>, ConnectError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait FortmaticSdk: Send + Sync {
    fn provider(&self) -> RawProvider;
    /// `getProvider().enable()`: prompts and returns the authorized accounts.
    async fn enable(&self) -> Result<Vec<Address>, ConnectError>;
    async fn logout(&self) -> Result<(), ConnectError>;
}

/// Builds a Magic client bound to one network. Magic cannot switch chains, so
/// a chain switch builds a new client.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait MagicSdk: Send + Sync {
    async fn build(
        &self,
        api_key: &str,
        rpc_url: Option<&str>,
        chain_id: ChainId,
    ) -> Result<Arc<dyn MagicClient>, ConnectError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait MagicClient: Send + Sync {
    async fn is_logged_in(&self) -> Result<bool, ConnectError>;
    async fn provider(&self) -> Result<RawProvider, ConnectError>;
    async fn logout(&self) -> Result<(), ConnectError>;
}

pub trait WalletLinkSdk: Send + Sync {
    /// `new WalletLink({ appName }).makeWeb3Provider(url, chainId)`.
    fn make_web3_provider(
        &self,
        app_name: &str,
        rpc_url: Option<&str>,
        chain_id: ChainId,
    ) -> Result<Arc<dyn WalletLinkProvider>, ConnectError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait WalletLinkProvider: Send + Sync {
    fn raw(&self) -> RawProvider;
    async fn close(&self) -> Result<(), ConnectError>;
}

/// Options handed to the relay SDK's `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInitOptions {
    pub project_id: String,
    pub rpc_map: BTreeMap<ChainId, String>,
    pub chains: Vec<ChainId>,
    pub optional_chains: Vec<ChainId>,
    pub show_qr_modal: bool,
    /// Our RPC nodes reject the `test` method used by the ping.
    pub disable_provider_ping: bool,
    pub methods: Vec<String>,
    pub optional_methods: Vec<String>,
    pub events: Vec<String>,
    pub optional_events: Vec<String>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RelaySdk: Send + Sync {
    async fn init(&self, options: RelayInitOptions) -> Result<Arc<dyn RelaySession>, ConnectError>;
}

/// A live relay provider. One per process, shared through the session
/// registry.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RelaySession: Send + Sync {
    /// Shows the pairing modal if needed and returns the approved accounts.
    async fn enable(&self) -> Result<Vec<Address>, ConnectError>;
    fn raw(&self) -> RawProvider;
    fn chain_id(&self) -> ChainId;
    fn accounts(&self) -> Vec<Address>;
    /// Peer metadata name, when a session with a peer exists.
    fn peer_name(&self) -> Option<String>;
    async fn disconnect(&self) -> Result<(), ConnectError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait ThirdwebSdk: Send + Sync {
    /// Restores a session the host authenticated beforehand.
    async fn auto_connect(&self, client_id: &str) -> Result<Option<Address>, ConnectError>;
    /// `EIP1193.toProvider({ wallet, chain, client })`.
    fn to_provider(&self, chain_id: ChainId) -> Result<RawProvider, ConnectError>;
    fn account(&self) -> Option<Address>;
    async fn disconnect(&self) -> Result<(), ConnectError>;
}

/// Signing request submitted to the auth relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub method: String,
    pub params: Value,
}

/// Acknowledgement of a [`RelayRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequestResponse {
    #[serde(default)]
    pub request_id: String,
    pub expiration: Option<DateTime<Utc>>,
    /// Verification code shown to the user before opening the companion app.
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayOutcomeError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutcome {
    pub request_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RelayOutcomeError>,
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RelayTransport: Send + Sync {
    /// Opens a channel and waits until it is connected.
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayChannel>, ConnectError>;
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RelayChannel: Send + Sync {
    /// `emitWithAck("request", ...)`.
    async fn request(&self, request: RelayRequest) -> Result<RelayRequestResponse, ConnectError>;
    /// Next `outcome` message, whichever request it belongs to.
    async fn next_outcome(&self) -> Result<RelayOutcome, ConnectError>;
    fn disconnect(&self);
}

/// Opens the companion signing app in a new browsing context.
pub trait CompanionOpener: Send + Sync {
    fn open(&self, url: &str);
}
