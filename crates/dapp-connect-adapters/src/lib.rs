//! Concrete wallet connectors and the factory that builds them.
//!
//! Wallet SDKs stay behind the traits in [`sdk`]; the host binds whichever
//! are available in its execution context through [`WalletBackends`].

pub mod configuration;
pub mod connectors;
pub mod rpc_client;
pub mod sdk;
#[cfg(target_arch = "wasm32")]
pub mod storage;

pub use configuration::Configuration;
pub use connectors::{
    AuthServerBackend, AuthServerConnector, AuthServerProvider, AuthServerSignIn,
    FortmaticConnector, InjectedConnector, MagicConnector, NetworkConnector, SdkConnectorFactory,
    ThirdwebConnector, WalletBackends, WalletConnectConnector, WalletLinkConnector,
};
pub use rpc_client::HttpJsonRpc;
pub use sdk::{
    CompanionOpener, FortmaticLoader, FortmaticSdk, MagicClient, MagicSdk, RelayChannel,
    RelaySdk, RelaySession, RelayTransport, ThirdwebSdk, WalletLinkProvider, WalletLinkSdk,
};
#[cfg(target_arch = "wasm32")]
pub use storage::LocalStorage;
