//! Static endpoint tables consumed by the connectors.
//!
//! Pure lookup: nothing in here talks to the network.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dapp_connect_core::{ChainId, ConnectError, ProviderKind};

pub type ChainMap<T> = BTreeMap<ChainId, T>;
pub type RpcUrlMap = ChainMap<String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConnectChainEntry {
    pub chains: Vec<ChainId>,
    pub optional_chains: Vec<ChainId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FortmaticConfiguration {
    pub api_keys: ChainMap<String>,
    pub urls: RpcUrlMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfiguration {
    pub urls: RpcUrlMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletLinkConfiguration {
    pub app_name: String,
    pub urls: RpcUrlMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WalletConnectConfiguration {
    pub project_id: String,
    pub urls: RpcUrlMap,
    pub chains: ChainMap<WalletConnectChainEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MagicConfiguration {
    pub api_key: String,
    pub urls: RpcUrlMap,
    pub chains: Vec<ChainId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThirdwebConfiguration {
    pub client_id: Option<String>,
    pub chains: Vec<ChainId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthServerConfiguration {
    /// Relay endpoint the signing requests are submitted to.
    pub server_url: String,
    /// Companion app; requests open at `{dapp_url}/requests/{id}`.
    pub dapp_url: String,
}

/// Every table the connectors read. Keys serialize the way the wire
/// descriptor does (`formatic`, `wallet_connect_v2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    #[serde(rename = "formatic")]
    pub fortmatic: FortmaticConfiguration,
    pub network: NetworkConfiguration,
    pub wallet_link: WalletLinkConfiguration,
    pub wallet_connect_v2: WalletConnectConfiguration,
    pub magic: MagicConfiguration,
    pub magic_test: MagicConfiguration,
    pub thirdweb: ThirdwebConfiguration,
    pub auth_server: AuthServerConfiguration,
}

impl Default for Configuration {
    fn default() -> Self {
        let urls = default_rpc_urls();
        let test_key = "pk_test_5B728BEFE5C10911".to_owned();
        let magic_chains = vec![
            ChainId::ETHEREUM_MAINNET,
            ChainId::ETHEREUM_SEPOLIA,
            ChainId::MATIC_MAINNET,
            ChainId::MATIC_AMOY,
        ];
        Self {
            fortmatic: FortmaticConfiguration {
                api_keys: BTreeMap::from([
                    (ChainId::ETHEREUM_MAINNET, "pk_live_F8E24DF8DD5BCBC5".to_owned()),
                    (ChainId::ETHEREUM_ROPSTEN, test_key.clone()),
                    (ChainId::ETHEREUM_RINKEBY, test_key.clone()),
                    (ChainId::ETHEREUM_KOVAN, test_key),
                ]),
                urls: urls.clone(),
            },
            network: NetworkConfiguration { urls: urls.clone() },
            wallet_link: WalletLinkConfiguration {
                app_name: String::new(),
                urls: urls.clone(),
            },
            wallet_connect_v2: WalletConnectConfiguration {
                project_id: String::new(),
                urls: urls.clone(),
                chains: BTreeMap::from([
                    wc_entry(ChainId::ETHEREUM_MAINNET, ChainId::MATIC_MAINNET),
                    wc_entry(ChainId::ETHEREUM_SEPOLIA, ChainId::MATIC_AMOY),
                    wc_entry(ChainId::MATIC_MAINNET, ChainId::ETHEREUM_MAINNET),
                    wc_entry(ChainId::MATIC_AMOY, ChainId::ETHEREUM_SEPOLIA),
                ]),
            },
            magic: MagicConfiguration {
                api_key: String::new(),
                urls: urls.clone(),
                chains: magic_chains.clone(),
            },
            magic_test: MagicConfiguration {
                api_key: String::new(),
                urls,
                chains: magic_chains,
            },
            thirdweb: ThirdwebConfiguration {
                client_id: None,
                chains: vec![ChainId::ETHEREUM_MAINNET, ChainId::ETHEREUM_SEPOLIA],
            },
            auth_server: AuthServerConfiguration::default(),
        }
    }
}

fn wc_entry(chain: ChainId, companion: ChainId) -> (ChainId, WalletConnectChainEntry) {
    (
        chain,
        WalletConnectChainEntry {
            chains: vec![chain],
            optional_chains: vec![chain, companion],
        },
    )
}

fn default_rpc_urls() -> RpcUrlMap {
    BTreeMap::from([
        (ChainId::ETHEREUM_MAINNET, "https://rpc.decentraland.org/mainnet".to_owned()),
        (ChainId::ETHEREUM_SEPOLIA, "https://rpc.decentraland.org/sepolia".to_owned()),
        (ChainId::MATIC_MAINNET, "https://rpc.decentraland.org/polygon".to_owned()),
        (ChainId::MATIC_AMOY, "https://rpc.decentraland.org/amoy".to_owned()),
    ])
}

impl Configuration {
    /// Parses a full or partial override; missing tables keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConnectError> {
        serde_json::from_str(raw)
            .map_err(|e| ConnectError::Configuration(format!("invalid configuration: {e}")))
    }

    /// RPC endpoints a kind binds to, if it has any.
    pub fn rpc_urls(&self, kind: ProviderKind) -> Option<&RpcUrlMap> {
        match kind {
            ProviderKind::Fortmatic => Some(&self.fortmatic.urls),
            ProviderKind::Network | ProviderKind::AuthServer => Some(&self.network.urls),
            ProviderKind::WalletLink => Some(&self.wallet_link.urls),
            ProviderKind::WalletConnectV2 => Some(&self.wallet_connect_v2.urls),
            ProviderKind::Magic => Some(&self.magic.urls),
            ProviderKind::MagicTest => Some(&self.magic_test.urls),
            ProviderKind::Injected | ProviderKind::Thirdweb => None,
        }
    }

    pub fn rpc_url(&self, kind: ProviderKind, chain_id: ChainId) -> Option<&str> {
        self.rpc_urls(kind)?.get(&chain_id).map(String::as_str)
    }

    pub fn magic_for(&self, test: bool) -> &MagicConfiguration {
        if test {
            &self.magic_test
        } else {
            &self.magic
        }
    }
}
