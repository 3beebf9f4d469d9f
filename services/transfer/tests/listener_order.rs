//! Listener fan-out: callbacks fire in transition order, exactly once

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use transfer_manager::{ManagerConfig, StatePatch, TransferListener, TransferManager};
use types::{
    ChainConfig, ChainId, EvmAddressValidator, InternalAddressValidator, SwapPair, TokenRef,
    TransferRequest, TransferResponse, TransferState, U256,
};

struct RecordingListener {
    calls: Mutex<Vec<String>>,
    done: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl TransferListener for RecordingListener {
    async fn on_initiated(&self, response: &TransferResponse) {
        self.calls.lock().push(format!("initiated:{}", response.request_id));
    }
    async fn on_confirmed(&self, response: &TransferResponse) {
        self.calls.lock().push(format!("confirmed:{}", response.request_id));
    }
    async fn on_completed(&self, response: &TransferResponse) {
        self.calls.lock().push(format!("completed:{}", response.request_id));
        let _ = self.done.send(response.request_id.clone());
    }
    async fn on_failed(&self, response: &TransferResponse) {
        self.calls.lock().push(format!("failed:{}", response.request_id));
        let _ = self.done.send(response.request_id.clone());
    }
    async fn on_rolled_back(&self, response: &TransferResponse) {
        self.calls.lock().push(format!("rolled_back:{}", response.request_id));
        let _ = self.done.send(response.request_id.clone());
    }
}

fn wired_manager() -> Arc<TransferManager> {
    let manager = Arc::new(TransferManager::new(ManagerConfig {
        sweep_interval: Duration::from_secs(3600),
        adapter_timeout: Duration::from_secs(1),
        intake_capacity: 16,
    }));
    let native = TokenRef::native("ETH", "Ether", 18, ChainId::Ethereum);
    let wrapped = TokenRef::internal("WETH", "Wrapped Ether", 18);
    manager
        .register_chain(ChainConfig {
            chain_id: ChainId::Ethereum,
            required_confirmations: 12,
            block_time_secs: 12,
            supported_tokens: vec![native.clone()],
            native_token: native.clone(),
            is_testnet: false,
        })
        .unwrap();
    manager
        .register_chain(ChainConfig {
            chain_id: ChainId::Internal,
            required_confirmations: 3,
            block_time_secs: 2,
            supported_tokens: vec![wrapped.clone()],
            native_token: wrapped.clone(),
            is_testnet: false,
        })
        .unwrap();
    manager.register_validator(Arc::new(EvmAddressValidator)).unwrap();
    manager.register_validator(Arc::new(InternalAddressValidator)).unwrap();
    manager
        .add_swap_pair(SwapPair {
            from_token: native,
            to_token: wrapped,
            exchange_rate: 1.0,
            min_amount: U256::one(),
            max_amount: U256::from(10).pow(U256::from(24)),
            fee_percent: 0.003,
            active: true,
        })
        .unwrap();
    manager
}

fn request(id: &str) -> TransferRequest {
    let now = Utc::now();
    TransferRequest {
        id: id.to_string(),
        from_chain: ChainId::Ethereum,
        to_chain: ChainId::Internal,
        from_address: "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string(),
        to_address: "bh1234deadbeef".to_string(),
        token: TokenRef::native("ETH", "Ether", 18, ChainId::Ethereum),
        amount: U256::from(1_000_000u64),
        fee: None,
        nonce: 1,
        deadline: now + ChronoDuration::minutes(30),
        signature: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn callbacks_arrive_in_transition_order() {
    let manager = wired_manager();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let listener = Arc::new(RecordingListener {
        calls: Mutex::new(Vec::new()),
        done: done_tx,
    });
    manager.subscribe(listener.clone());
    manager.start().unwrap();
    let _intake = manager.take_intake().await.unwrap();

    manager.accept(request("r1")).await.unwrap();
    manager
        .update("r1", TransferState::Submitted, StatePatch::default())
        .unwrap();
    manager
        .update("r1", TransferState::Confirmed, StatePatch::default())
        .unwrap();
    manager
        .update("r1", TransferState::Completed, StatePatch::default())
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
        .await
        .expect("terminal callback")
        .unwrap();

    let calls = listener.calls.lock().clone();
    assert_eq!(
        calls,
        vec![
            "initiated:r1".to_string(),
            "confirmed:r1".to_string(),
            "completed:r1".to_string(),
        ]
    );
    manager.shutdown();
}

#[tokio::test]
async fn failed_transfer_fires_on_failed_with_error_text() {
    let manager = wired_manager();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let listener = Arc::new(RecordingListener {
        calls: Mutex::new(Vec::new()),
        done: done_tx,
    });
    manager.subscribe(listener.clone());
    manager.start().unwrap();
    let _intake = manager.take_intake().await.unwrap();

    manager.accept(request("r1")).await.unwrap();
    manager
        .update(
            "r1",
            TransferState::Failed,
            StatePatch {
                error: Some("destination adapter rejected the mint".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
        .await
        .expect("terminal callback")
        .unwrap();

    let calls = listener.calls.lock().clone();
    assert_eq!(calls, vec!["initiated:r1".to_string(), "failed:r1".to_string()]);
    assert_eq!(
        manager.status_of("r1").unwrap().error.as_deref(),
        Some("destination adapter rejected the mint")
    );
    manager.shutdown();
}

#[tokio::test]
async fn completed_fires_exactly_once_per_request() {
    let manager = wired_manager();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let listener = Arc::new(RecordingListener {
        calls: Mutex::new(Vec::new()),
        done: done_tx,
    });
    manager.subscribe(listener.clone());
    manager.start().unwrap();
    let _intake = manager.take_intake().await.unwrap();

    manager.accept(request("r1")).await.unwrap();
    for state in [
        TransferState::Submitted,
        TransferState::Confirmed,
        TransferState::Completed,
    ] {
        manager.update("r1", state, StatePatch::default()).unwrap();
    }
    // duplicate terminal update is rejected, so no second callback
    assert!(manager
        .update("r1", TransferState::Completed, StatePatch::default())
        .is_ok()); // same-state patch, no event
    assert!(manager
        .update("r1", TransferState::Failed, StatePatch::default())
        .is_err());

    tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
        .await
        .expect("terminal callback")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let completed = listener
        .calls
        .lock()
        .iter()
        .filter(|c| c.starts_with("completed:"))
        .count();
    assert_eq!(completed, 1);
    manager.shutdown();
}
