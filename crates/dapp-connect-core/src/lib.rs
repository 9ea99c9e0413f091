//! Wallet-agnostic connection lifecycle.
//!
//! Connectors for each wallet backend live in `dapp-connect-adapters`; this
//! crate holds the contracts they implement, the provider compatibility
//! adapter and the [`ConnectionManager`] that drives them.

pub mod adapter;
pub mod config;
pub mod domain;
pub mod events;
pub mod manager;
pub mod ports;
pub mod registry;
pub mod rpc;
pub mod state_machine;
pub mod storage;
pub mod timer;

pub use adapter::{
    is_modern_provider, CallbackTransport, NormalizedProvider, ProviderEvents, RawProvider,
    RawProviderEvent, RawTransport, RequestTransport, RpcCallback, SendRequest,
};
pub use config::ConnectConfig;
pub use domain::{
    ChainId, ConnectionDescriptor, ConnectionResponse, ConnectorUpdate, ProviderKind,
};
pub use events::{
    ConnectionEvent, ConnectorEvent, EventEmitter, EventListener, Subscription,
};
pub use manager::ConnectionManager;
pub use ports::{ConnectError, Connector, ConnectorFactory, Storage, Teardown};
pub use registry::{EnableGuard, SessionPhase, SessionRegistry};
pub use rpc::{JsonRpcRequest, RequestArguments, RpcError};
pub use state_machine::{connector_transition, ConnectorAction, ConnectorState, Lifecycle};
pub use storage::MemoryStorage;
