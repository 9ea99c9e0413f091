use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::adapter::{NormalizedProvider, RawProvider};
use crate::ports::ConnectError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const ETHEREUM_MAINNET: Self = Self(1);
    pub const ETHEREUM_ROPSTEN: Self = Self(3);
    pub const ETHEREUM_RINKEBY: Self = Self(4);
    pub const ETHEREUM_GOERLI: Self = Self(5);
    pub const OPTIMISM_MAINNET: Self = Self(10);
    pub const ETHEREUM_KOVAN: Self = Self(42);
    pub const BSC_MAINNET: Self = Self(56);
    pub const MATIC_MAINNET: Self = Self(137);
    pub const FANTOM_MAINNET: Self = Self(250);
    pub const ARBITRUM_MAINNET: Self = Self(42161);
    pub const AVALANCHE_MAINNET: Self = Self(43114);
    pub const MATIC_MUMBAI: Self = Self(80001);
    pub const MATIC_AMOY: Self = Self(80002);
    pub const ETHEREUM_SEPOLIA: Self = Self(11155111);

    pub fn to_hex(self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Wallet backend a connection goes through. The serialized names are the
/// values persisted in the connection descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "injected")]
    Injected,
    #[serde(rename = "formatic")]
    Fortmatic,
    #[serde(rename = "magic")]
    Magic,
    #[serde(rename = "magic_test")]
    MagicTest,
    #[serde(rename = "wallet_link")]
    WalletLink,
    #[serde(rename = "wallet_connect_v2")]
    WalletConnectV2,
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "auth_server")]
    AuthServer,
    #[serde(rename = "thirdweb")]
    Thirdweb,
}

impl ProviderKind {
    pub const ALL: [Self; 9] = [
        Self::Injected,
        Self::Fortmatic,
        Self::Magic,
        Self::MagicTest,
        Self::WalletLink,
        Self::WalletConnectV2,
        Self::Network,
        Self::AuthServer,
        Self::Thirdweb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Injected => "injected",
            Self::Fortmatic => "formatic",
            Self::Magic => "magic",
            Self::MagicTest => "magic_test",
            Self::WalletLink => "wallet_link",
            Self::WalletConnectV2 => "wallet_connect_v2",
            Self::Network => "network",
            Self::AuthServer => "auth_server",
            Self::Thirdweb => "thirdweb",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConnectError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| ConnectError::InvalidProviderKind(raw.to_owned()))
    }
}

/// The persisted `{providerKind, chainId}` record of the last successful
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub provider_kind: ProviderKind,
    pub chain_id: ChainId,
}

/// What a connector hands back from a successful activation.
#[derive(Debug, Clone)]
pub struct ConnectorUpdate {
    pub provider: RawProvider,
    pub account: Option<Address>,
    /// Chain the transport reports it is on, when it has a notion of one.
    pub chain_id: Option<ChainId>,
}

#[derive(Debug, Clone)]
pub struct ConnectionResponse {
    pub provider: NormalizedProvider,
    pub provider_kind: ProviderKind,
    pub account: Option<Address>,
    pub chain_id: ChainId,
}

impl ConnectionResponse {
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            provider_kind: self.provider_kind,
            chain_id: self.chain_id,
        }
    }
}
