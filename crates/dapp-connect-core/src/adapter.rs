//! Provider compatibility adapter.
//!
//! Wallet SDKs hand out JSON-RPC objects that implement some subset of
//! `request`, callback-style `send` and `sendAsync`. [`RawProvider`] records
//! which calling convention a wallet speaks when it is built, and
//! [`NormalizedProvider`] exposes one async `request` plus the dual-mode
//! `send` that legacy callers check for.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::oneshot;
use serde_json::Value;

use crate::events::{EventListener, Subscription};
use crate::ports::ConnectError;
use crate::rpc::{JsonRpcRequest, RequestArguments, JSONRPC_VERSION};

pub type RpcCallback = Box<dyn FnOnce(Result<Value, ConnectError>) + Send>;

/// `provider.request({ method, params })`.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait RequestTransport: Send + Sync {
    async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError>;
}

/// `provider.send(payload, callback)` and `provider.sendAsync(payload, callback)`.
pub trait CallbackTransport: Send + Sync {
    fn send(&self, payload: JsonRpcRequest, callback: RpcCallback);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawProviderEvent {
    ChainChanged(Value),
    AccountsChanged(Vec<String>),
    Disconnect(Option<String>),
}

/// `provider.on(...)`; dropping the returned subscription is `removeListener`.
pub trait ProviderEvents: Send + Sync {
    fn on(&self, listener: EventListener<RawProviderEvent>) -> Subscription;
}

#[derive(Clone)]
pub enum RawTransport {
    Modern(Arc<dyn RequestTransport>),
    Legacy(Arc<dyn CallbackTransport>),
}

/// A wallet-supplied provider together with the capabilities it was built
/// with. Never mutated by the adapter.
#[derive(Clone)]
pub struct RawProvider {
    transport: RawTransport,
    send_async: Option<Arc<dyn CallbackTransport>>,
    events: Option<Arc<dyn ProviderEvents>>,
    flags: BTreeMap<String, Value>,
}

impl RawProvider {
    pub fn modern(transport: Arc<dyn RequestTransport>) -> Self {
        Self::from_transport(RawTransport::Modern(transport))
    }

    pub fn legacy(transport: Arc<dyn CallbackTransport>) -> Self {
        Self::from_transport(RawTransport::Legacy(transport))
    }

    /// A provider that only knows `sendAsync`.
    pub fn send_async_only(transport: Arc<dyn CallbackTransport>) -> Self {
        Self::from_transport(RawTransport::Legacy(Arc::clone(&transport)))
            .with_send_async(transport)
    }

    fn from_transport(transport: RawTransport) -> Self {
        Self {
            transport,
            send_async: None,
            events: None,
            flags: BTreeMap::new(),
        }
    }

    pub fn with_send_async(mut self, transport: Arc<dyn CallbackTransport>) -> Self {
        self.send_async = Some(transport);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn ProviderEvents>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }

    pub fn transport(&self) -> &RawTransport {
        &self.transport
    }

    pub fn events(&self) -> Option<Arc<dyn ProviderEvents>> {
        self.events.clone()
    }

    pub fn flags(&self) -> &BTreeMap<String, Value> {
        &self.flags
    }
}

impl std::fmt::Debug for RawProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawProvider")
            .field("modern", &is_modern_provider(self))
            .field("send_async", &self.send_async.is_some())
            .field("events", &self.events.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

/// The only dispatch predicate: does the wallet implement `request`.
pub fn is_modern_provider(raw: &RawProvider) -> bool {
    matches!(raw.transport, RawTransport::Modern(_))
}

/// Arguments to the overloaded `send`.
pub enum SendRequest {
    /// `send(method, params)`: resolves with the result.
    Positional { method: String, params: Value },
    /// `send(payload, callback)`: answers through the callback with a full
    /// JSON-RPC response object.
    WithCallback {
        args: RequestArguments,
        callback: RpcCallback,
    },
}

impl From<(&str, Value)> for SendRequest {
    fn from((method, params): (&str, Value)) -> Self {
        Self::Positional {
            method: method.to_owned(),
            params,
        }
    }
}

impl From<(RequestArguments, RpcCallback)> for SendRequest {
    fn from((args, callback): (RequestArguments, RpcCallback)) -> Self {
        Self::WithCallback { args, callback }
    }
}

#[derive(Clone)]
pub struct NormalizedProvider {
    raw: RawProvider,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for NormalizedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedProvider")
            .field("raw", &self.raw)
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl NormalizedProvider {
    pub fn adapt(raw: RawProvider) -> Self {
        Self {
            raw,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn is_modern(&self) -> bool {
        is_modern_provider(&self.raw)
    }

    pub fn raw(&self) -> &RawProvider {
        &self.raw
    }

    /// Wallet identity flags (`isMetaMask`, `isMagic`, ...) copied from the
    /// raw provider.
    pub fn flag(&self, name: &str) -> Option<&Value> {
        self.raw.flags.get(name)
    }

    pub fn flags(&self) -> &BTreeMap<String, Value> {
        &self.raw.flags
    }

    pub fn events(&self) -> Option<Arc<dyn ProviderEvents>> {
        self.raw.events()
    }

    pub async fn request(&self, args: RequestArguments) -> Result<Value, ConnectError> {
        self.dispatch(args).await.map(|(_, value)| value)
    }

    pub async fn request_method(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, ConnectError> {
        self.request(RequestArguments::new(method, params)).await
    }

    /// Returns `Some(result)` for the positional form and `None` once the
    /// callback form has invoked its callback.
    pub async fn send(
        &self,
        request: impl Into<SendRequest>,
    ) -> Result<Option<Value>, ConnectError> {
        match request.into() {
            SendRequest::Positional { method, params } => {
                self.request(RequestArguments::new(method, params))
                    .await
                    .map(Some)
            }
            SendRequest::WithCallback { args, callback } => {
                match self.dispatch(args).await {
                    Ok((id, result)) => callback(Ok(serde_json::json!({
                        "id": id,
                        "jsonrpc": JSONRPC_VERSION,
                        "result": result,
                    }))),
                    Err(e) => callback(Err(e)),
                }
                Ok(None)
            }
        }
    }

    pub async fn send_async(&self, payload: JsonRpcRequest, callback: RpcCallback) {
        match &self.raw.send_async {
            Some(transport) => transport.send(payload, callback),
            None => {
                let _ = self
                    .send(SendRequest::WithCallback {
                        args: payload.arguments(),
                        callback,
                    })
                    .await;
            }
        }
    }

    async fn dispatch(&self, args: RequestArguments) -> Result<(Value, Value), ConnectError> {
        match &self.raw.transport {
            RawTransport::Modern(transport) => {
                let result = transport.request(args).await?;
                Ok((Value::String(String::new()), result))
            }
            RawTransport::Legacy(transport) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let envelope = JsonRpcRequest::new(id, &args);
                let value = send_with_callback(transport.as_ref(), envelope).await?;
                Ok((Value::from(id), unwrap_result(value)))
            }
        }
    }
}

async fn send_with_callback(
    transport: &dyn CallbackTransport,
    envelope: JsonRpcRequest,
) -> Result<Value, ConnectError> {
    let (tx, rx) = oneshot::channel();
    transport.send(
        envelope,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    rx.await.map_err(|_| {
        ConnectError::Transport("legacy provider dropped the send callback".to_owned())
    })?
}

fn unwrap_result(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}
