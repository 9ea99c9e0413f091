use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use dapp_connect_core::timer::race_timeout;
use dapp_connect_core::{ConnectError, JsonRpcRequest, RequestArguments, RequestTransport, RpcError};

/// Plain JSON-RPC over HTTP POST, used wherever no wallet is involved.
#[derive(Debug)]
pub struct HttpJsonRpc {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicU64,
}

impl HttpJsonRpc {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), url, timeout)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            client,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, args: &RequestArguments) -> Result<Value, ConnectError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = JsonRpcRequest::new(id, args);
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ConnectError::Transport(format!("rpc request to {} failed: {e}", self.url)))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ConnectError::Transport(format!("rpc json decode failed: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(match serde_json::from_value::<RpcError>(err.clone()) {
                Ok(rpc) => ConnectError::Rpc(rpc),
                Err(_) => ConnectError::Transport(format!("rpc returned error: {err}")),
            });
        }
        if !status.is_success() {
            return Err(ConnectError::Transport(format!("rpc status {status}: {body}")));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| ConnectError::Transport("rpc response missing result".to_owned()))
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RequestTransport for HttpJsonRpc {
    async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        tracing::debug!(url = %self.url, method = %args.method, "http rpc call");
        race_timeout(self.call(&args), self.timeout)
            .await
            .unwrap_or_else(|| {
                Err(ConnectError::Timeout(format!(
                    "{} did not answer {} within {:?}",
                    self.url, args.method, self.timeout
                )))
            })
    }
}
