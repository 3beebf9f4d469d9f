//! Ethereum reference adapter
//!
//! Talks JSON-RPC over a WebSocket to an EVM node. The subscription is a
//! polling scan of bridge-contract logs that only emits events at or past
//! the chain's required confirmation depth; the relay's reorg safety rests
//! on that property. Submission goes through `eth_sendTransaction` against a
//! node-managed relayer account; key material never enters the bridge.
//!
//! The bridge contract emits
//! `BridgeTransfer(address indexed from, address indexed token, string to, uint256 amount)`
//! on the lock/burn side and exposes `releaseTokens(address,uint256)` on the
//! release side. Rollback is refused: a released EVM transfer is
//! irreversible from here.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use web3::signing::keccak256;
use web3::types::{H160, U256 as EvmU256};

use crate::common::{
    ChainAdapter, Confirmation, EventStream, RawChainEvent, SubmitReceipt, TxState, TxStatus,
};
use crate::error::{AdapterError, Result};
use types::{ChainId, TransferRequest};

const BRIDGE_EVENT_SIGNATURE: &str = "BridgeTransfer(address,address,string,uint256)";
const RELEASE_FUNCTION_SIGNATURE: &str = "releaseTokens(address,uint256)";

/// Configuration for one EVM endpoint
#[derive(Debug, Clone)]
pub struct EthereumAdapterConfig {
    /// WebSocket JSON-RPC endpoint
    pub ws_url: String,
    /// Bridge contract address (log source and release target)
    pub bridge_contract: String,
    /// Node-managed account submissions are sent from
    pub relayer_account: String,
    /// Symbol reported when the zero address is the event token
    pub native_symbol: String,
    /// Per-call timeout
    pub call_timeout: Duration,
    /// Depth at which source events become visible
    pub required_confirmations: u32,
    /// Poll interval of the log scan
    pub poll_interval: Duration,
}

impl Default for EthereumAdapterConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8546".to_string(),
            bridge_contract: "0x0000000000000000000000000000000000000000".to_string(),
            relayer_account: "0x0000000000000000000000000000000000000000".to_string(),
            native_symbol: "ETH".to_string(),
            call_timeout: Duration::from_secs(10),
            required_confirmations: 12,
            poll_interval: Duration::from_secs(3),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serialized JSON-RPC client over one WebSocket
///
/// The underlying protocol multiplexes poorly without subscription ids, so
/// calls are serialized behind a mutex; a transport error drops the socket
/// and the next call reconnects.
struct WsRpc {
    url: String,
    socket: Mutex<Option<WsStream>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl WsRpc {
    fn new(url: String, timeout: Duration) -> Self {
        Self {
            url,
            socket: Mutex::new(None),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let timeout_ms = self.timeout.as_millis() as u64;
        tokio::time::timeout(self.timeout, self.call_inner(method, params))
            .await
            .map_err(|_| AdapterError::Timeout {
                chain: ChainId::Ethereum,
                timeout_ms,
            })?
    }

    async fn call_inner(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.socket.lock().await;

        if guard.is_none() {
            let (stream, _) = connect_async(self.url.as_str()).await.map_err(|e| {
                AdapterError::ConnectionFailed {
                    chain: ChainId::Ethereum,
                    reason: format!("connect {}: {e}", self.url),
                }
            })?;
            info!("ethereum rpc connected to {}", self.url);
            *guard = Some(stream);
        }
        let socket = guard.as_mut().expect("socket just connected");

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let outcome: Result<Value> = async {
            socket
                .send(Message::Text(request.to_string()))
                .await
                .map_err(|e| AdapterError::ConnectionFailed {
                    chain: ChainId::Ethereum,
                    reason: format!("send: {e}"),
                })?;

            loop {
                let message = socket.next().await.ok_or_else(|| {
                    AdapterError::ConnectionFailed {
                        chain: ChainId::Ethereum,
                        reason: "socket closed mid-call".to_string(),
                    }
                })?;
                let message = message.map_err(|e| AdapterError::ConnectionFailed {
                    chain: ChainId::Ethereum,
                    reason: format!("recv: {e}"),
                })?;

                let text = match message {
                    Message::Text(text) => text,
                    Message::Ping(_) | Message::Pong(_) => continue,
                    Message::Close(_) => {
                        return Err(AdapterError::ConnectionFailed {
                            chain: ChainId::Ethereum,
                            reason: "socket closed by peer".to_string(),
                        })
                    }
                    _ => continue,
                };

                let value: Value =
                    serde_json::from_str(&text).map_err(|e| AdapterError::Parse {
                        chain: ChainId::Ethereum,
                        reason: format!("rpc frame: {e}"),
                    })?;

                // Responses to other ids (stale frames after a timeout) are
                // skipped until ours arrives.
                if value.get("id").and_then(Value::as_u64) != Some(id) {
                    continue;
                }
                if let Some(err) = value.get("error") {
                    return Err(AdapterError::SubmitFailed {
                        chain: ChainId::Ethereum,
                        reason: format!("{method}: {err}"),
                    });
                }
                return Ok(value.get("result").cloned().unwrap_or(Value::Null));
            }
        }
        .await;

        if matches!(outcome, Err(AdapterError::ConnectionFailed { .. })) {
            // Force a reconnect on the next call.
            *guard = None;
        }
        outcome
    }
}

/// EVM chain adapter
pub struct EthereumAdapter {
    config: EthereumAdapterConfig,
    rpc: Arc<WsRpc>,
    submissions: DashMap<String, SubmitReceipt>,
    event_topic: String,
    release_selector: [u8; 4],
}

impl EthereumAdapter {
    pub fn new(config: EthereumAdapterConfig) -> Self {
        let rpc = Arc::new(WsRpc::new(config.ws_url.clone(), config.call_timeout));
        let event_topic = format!(
            "0x{}",
            hex::encode(keccak256(BRIDGE_EVENT_SIGNATURE.as_bytes()))
        );
        let selector_hash = keccak256(RELEASE_FUNCTION_SIGNATURE.as_bytes());
        let mut release_selector = [0u8; 4];
        release_selector.copy_from_slice(&selector_hash[..4]);
        Self {
            config,
            rpc,
            submissions: DashMap::new(),
            event_topic,
            release_selector,
        }
    }

    async fn latest_block(&self) -> Result<u64> {
        let result = self.rpc.call("eth_blockNumber", json!([])).await?;
        parse_hex_quantity(&result).ok_or_else(|| AdapterError::Parse {
            chain: ChainId::Ethereum,
            reason: format!("eth_blockNumber result {result}"),
        })
    }

    /// Calldata for `releaseTokens(address,uint256)`
    fn release_calldata(&self, request: &TransferRequest) -> Result<String> {
        let recipient: H160 = request
            .to_address
            .parse()
            .map_err(|_| AdapterError::SubmitFailed {
                chain: ChainId::Ethereum,
                reason: format!("recipient {} is not an EVM address", request.to_address),
            })?;

        let minimal = types::amount::to_minimal_be_bytes(&request.amount);
        let mut amount_word = [0u8; 32];
        amount_word[32 - minimal.len()..].copy_from_slice(&minimal);

        let mut data = Vec::with_capacity(4 + 32 + 32);
        data.extend_from_slice(&self.release_selector);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(recipient.as_bytes());
        data.extend_from_slice(&amount_word);
        Ok(format!("0x{}", hex::encode(data)))
    }
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    fn chain_id(&self) -> ChainId {
        ChainId::Ethereum
    }

    async fn subscribe(&self, from_block: Option<u64>) -> Result<EventStream> {
        let start = match from_block {
            Some(block) => block,
            // Without a checkpoint, start at the tip; history is not replayed.
            None => self.latest_block().await?.saturating_add(1),
        };
        info!("ethereum log scan starting at block {start}");

        let state = PollState {
            rpc: self.rpc.clone(),
            contract: self.config.bridge_contract.clone(),
            topic: self.event_topic.clone(),
            native_symbol: self.config.native_symbol.clone(),
            next_block: start,
            depth: self.config.required_confirmations as u64,
            poll_interval: self.config.poll_interval,
            buffer: VecDeque::new(),
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.buffer.pop_front() {
                    return Some((event, state));
                }
                match state.fetch_mature_logs().await {
                    Ok(events) => {
                        if events.is_empty() {
                            tokio::time::sleep(state.poll_interval).await;
                        } else {
                            state.buffer.extend(events);
                        }
                    }
                    Err(e) if e.is_transient() => {
                        warn!("ethereum log scan hiccup, retrying: {e}");
                        tokio::time::sleep(state.poll_interval).await;
                    }
                    Err(e) => {
                        // The worker restarts the stream from its checkpoint.
                        error!("ethereum log scan failed: {e}");
                        return None;
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn submit(&self, request: &TransferRequest) -> Result<SubmitReceipt> {
        if let Some(existing) = self.submissions.get(&request.id) {
            return Err(AdapterError::AlreadySubmitted {
                request_id: request.id.clone(),
                tx_id: existing.value().tx_id.clone(),
            });
        }

        let calldata = self.release_calldata(request)?;
        let result = self
            .rpc
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": self.config.relayer_account,
                    "to": self.config.bridge_contract,
                    "data": calldata,
                }]),
            )
            .await?;

        let tx_id = result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AdapterError::Parse {
                chain: ChainId::Ethereum,
                reason: format!("eth_sendTransaction result {result}"),
            })?;

        let receipt = SubmitReceipt {
            tx_id: tx_id.clone(),
            state: TxState::Pending,
        };
        self.submissions.insert(request.id.clone(), receipt.clone());
        info!("submitted release for {} as {}", request.id, tx_id);
        Ok(receipt)
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus> {
        let receipt = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_id]))
            .await?;

        if receipt.is_null() {
            // Still in the mempool.
            return Ok(TxStatus {
                state: TxState::Pending,
                confirmations: 0,
            });
        }

        if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
            return Ok(TxStatus {
                state: TxState::Failed,
                confirmations: 0,
            });
        }

        let mined_at = receipt
            .get("blockNumber")
            .and_then(parse_hex_quantity)
            .ok_or_else(|| AdapterError::Parse {
                chain: ChainId::Ethereum,
                reason: "receipt without blockNumber".to_string(),
            })?;
        let latest = self.latest_block().await?;
        let confirmations = latest.saturating_sub(mined_at).saturating_add(1) as u32;

        let state = if confirmations >= self.config.required_confirmations {
            TxState::Confirmed
        } else {
            TxState::Pending
        };
        Ok(TxStatus {
            state,
            confirmations,
        })
    }

    async fn confirm(&self, tx_id: &str) -> Result<Confirmation> {
        let status = self.status(tx_id).await?;
        Ok(Confirmation {
            confirmations: status.confirmations,
            is_final: status.state == TxState::Confirmed,
        })
    }

    async fn rollback(&self, _request: &TransferRequest) -> Result<()> {
        // A released EVM transfer cannot be clawed back from here.
        Err(AdapterError::Irreversible {
            chain: ChainId::Ethereum,
        })
    }
}

struct PollState {
    rpc: Arc<WsRpc>,
    contract: String,
    topic: String,
    native_symbol: String,
    next_block: u64,
    depth: u64,
    poll_interval: Duration,
    buffer: VecDeque<RawChainEvent>,
}

impl PollState {
    /// Scan the next range of blocks that have reached the required depth
    async fn fetch_mature_logs(&mut self) -> Result<Vec<RawChainEvent>> {
        let latest = {
            let result = self.rpc.call("eth_blockNumber", json!([])).await?;
            parse_hex_quantity(&result).ok_or_else(|| AdapterError::Parse {
                chain: ChainId::Ethereum,
                reason: format!("eth_blockNumber result {result}"),
            })?
        };

        let mature = latest.saturating_sub(self.depth);
        if self.next_block > mature {
            return Ok(Vec::new());
        }

        let logs = self
            .rpc
            .call(
                "eth_getLogs",
                json!([{
                    "fromBlock": format!("0x{:x}", self.next_block),
                    "toBlock": format!("0x{:x}", mature),
                    "address": self.contract,
                    "topics": [self.topic],
                }]),
            )
            .await?;

        let mut events = Vec::new();
        for log in logs.as_array().cloned().unwrap_or_default() {
            match parse_bridge_log(&log, &self.native_symbol) {
                Ok(event) => events.push(event),
                Err(e) => debug!("skipping unparseable log: {e}"),
            }
        }
        self.next_block = mature + 1;
        Ok(events)
    }
}

fn parse_hex_quantity(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.strip_prefix("0x")?, 16).ok()
}

/// Decode one `BridgeTransfer` log into a raw event
///
/// Topics: `[signature, from, token]` (indexed addresses left-padded to 32
/// bytes). Data is the ABI encoding of `(string to, uint256 amount)`: a
/// 32-byte offset to the string, the 32-byte amount, then the string's
/// length word and bytes.
fn parse_bridge_log(log: &Value, native_symbol: &str) -> Result<RawChainEvent> {
    let parse = |reason: String| AdapterError::Parse {
        chain: ChainId::Ethereum,
        reason,
    };

    let topics = log
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| parse("log without topics".to_string()))?;
    if topics.len() < 3 {
        return Err(parse(format!("expected 3 topics, got {}", topics.len())));
    }

    let from = topic_address(&topics[1]).ok_or_else(|| parse("bad from topic".to_string()))?;
    let token = topic_address(&topics[2]).ok_or_else(|| parse("bad token topic".to_string()))?;

    let data_hex = log
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| parse("log without data".to_string()))?;
    let data = hex::decode(data_hex.strip_prefix("0x").unwrap_or(data_hex))
        .map_err(|e| parse(format!("data hex: {e}")))?;
    if data.len() < 96 {
        return Err(parse(format!("data too short: {} bytes", data.len())));
    }

    let amount = EvmU256::from_big_endian(&data[32..64]);

    // Bounds-check the dynamic words as U256 before narrowing; a hostile log
    // must fail cleanly instead of panicking.
    let offset_word = EvmU256::from_big_endian(&data[0..32]);
    if offset_word > EvmU256::from(data.len() as u64) {
        return Err(parse("string offset out of range".to_string()));
    }
    let offset = offset_word.as_usize();
    if data.len() < offset + 32 {
        return Err(parse("string offset out of range".to_string()));
    }
    let len_word = EvmU256::from_big_endian(&data[offset..offset + 32]);
    if len_word > EvmU256::from(data.len() as u64) {
        return Err(parse("string length out of range".to_string()));
    }
    let str_len = len_word.as_usize();
    if data.len() < offset + 32 + str_len {
        return Err(parse("string length out of range".to_string()));
    }
    let to = std::str::from_utf8(&data[offset + 32..offset + 32 + str_len])
        .map_err(|e| parse(format!("recipient utf8: {e}")))?
        .to_string();

    let is_native = token == H160::zero();

    let mut event = RawChainEvent::of_kind(ChainId::Ethereum, RawChainEvent::KIND_TRANSFER);
    event.tx_id = log
        .get("transactionHash")
        .and_then(Value::as_str)
        .map(str::to_string);
    event.log_index = log
        .get("logIndex")
        .and_then(parse_hex_quantity)
        .map(|i| i as u32);
    event.from = Some(format!("0x{}", hex::encode(from.as_bytes())));
    event.to = Some(to);
    event.token_symbol = is_native.then(|| native_symbol.to_string());
    event.contract_address =
        (!is_native).then(|| format!("0x{}", hex::encode(token.as_bytes())));
    event.amount = Some(amount.to_string());
    event.block_height = log.get("blockNumber").and_then(parse_hex_quantity);
    Ok(event)
}

fn topic_address(topic: &Value) -> Option<H160> {
    let s = topic.as_str()?.strip_prefix("0x")?;
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    Some(H160::from_slice(&bytes[12..32]))
}
