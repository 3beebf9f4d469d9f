//! bridged: the Spanbridge daemon
//!
//! Wires the replay store, transfer manager, relay engine, reference
//! adapters, and the HTTP/WS surface into one process. Exit codes: 0 clean
//! shutdown, 2 replay store corruption, 3 registration failure.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use adapter_service::{EthereumAdapter, EthereumAdapterConfig, HostLedger, InternalChainAdapter};
use bridge_api::{ws, BridgeApi, BridgeConfig};
use relay_engine::RelayEngine;
use replay_store::ReplayStore;
use transfer_manager::{FeeSchedule, FlatFeeCalculator, TransferManager};
use types::{
    ChainConfig, ChainId, EvmAddressValidator, InternalAddressValidator, SvmAddressValidator,
    SwapPair, TokenRef, U256,
};

const EXIT_STORE_CORRUPT: i32 = 2;
const EXIT_REGISTRATION_FAILED: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "bridged", about = "Cross-chain token bridge core daemon")]
struct Args {
    /// HTTP API listen address
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: SocketAddr,

    /// WebSocket log stream listen address
    #[arg(long, default_value = "127.0.0.1:8081")]
    ws_addr: SocketAddr,

    /// Ethereum WebSocket JSON-RPC endpoint; omit to run without the
    /// ethereum adapter
    #[arg(long)]
    eth_ws_url: Option<String>,

    /// Bridge contract address on ethereum
    #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
    eth_bridge_contract: String,

    /// Node-managed relayer account for destination submissions
    #[arg(long, default_value = "0x0000000000000000000000000000000000000000")]
    eth_relayer_account: String,
}

fn chain_configs() -> (ChainConfig, ChainConfig) {
    let weth = TokenRef::internal("WETH", "Wrapped Ether", 18);
    let eth = TokenRef::native("ETH", "Ether", 18, ChainId::Ethereum);

    let internal = ChainConfig {
        chain_id: ChainId::Internal,
        required_confirmations: 3,
        block_time_secs: 2,
        supported_tokens: vec![weth.clone()],
        native_token: weth,
        is_testnet: false,
    };
    let ethereum = ChainConfig {
        chain_id: ChainId::Ethereum,
        required_confirmations: 12,
        block_time_secs: 12,
        supported_tokens: vec![eth.clone()],
        native_token: eth,
        is_testnet: false,
    };
    (internal, ethereum)
}

fn register_everything(
    manager: &Arc<TransferManager>,
    internal_chain: ChainConfig,
    ethereum_chain: ChainConfig,
    internal_adapter: Arc<InternalChainAdapter>,
    ethereum_adapter: Option<Arc<EthereumAdapter>>,
) -> anyhow::Result<()> {
    let weth = internal_chain.native_token.clone();
    let eth = ethereum_chain.native_token.clone();

    manager.register_chain(internal_chain)?;
    manager.register_chain(ethereum_chain)?;

    manager.register_validator(Arc::new(EvmAddressValidator))?;
    manager.register_validator(Arc::new(SvmAddressValidator))?;
    manager.register_validator(Arc::new(InternalAddressValidator))?;

    manager.register_fee_calculator(Arc::new(
        FlatFeeCalculator::new(ChainId::Internal)
            .with_schedule("WETH", FeeSchedule::new(U256::from(10_000u64), 30)),
    ))?;
    manager.register_fee_calculator(Arc::new(
        FlatFeeCalculator::new(ChainId::Ethereum)
            .with_schedule("ETH", FeeSchedule::new(U256::from(100_000u64), 30)),
    ))?;

    manager.register_handler(internal_adapter)?;
    if let Some(adapter) = ethereum_adapter {
        manager.register_handler(adapter)?;
    }

    manager.add_swap_pair(SwapPair {
        from_token: weth.clone(),
        to_token: eth.clone(),
        exchange_rate: 1.0,
        min_amount: U256::from(1_000_000u64),
        max_amount: U256::from(10).pow(U256::from(24)),
        fee_percent: 0.003,
        active: true,
    })?;
    manager.add_swap_pair(SwapPair {
        from_token: eth,
        to_token: weth,
        exchange_rate: 1.0,
        min_amount: U256::from(1_000_000u64),
        max_amount: U256::from(10).pow(U256::from(24)),
        fee_percent: 0.003,
        active: true,
    })?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = BridgeConfig::from_env();
    let (internal_chain, ethereum_chain) = chain_configs();
    config.clamp_retention(&[internal_chain.clone(), ethereum_chain.clone()]);

    info!("🚀 bridged starting (replay store at {:?})", config.replay_path);

    let replay = match ReplayStore::open(&config.replay_path) {
        Ok(store) => Arc::new(store),
        Err(e) if e.is_fatal() => {
            error!("replay store corrupt: {e}");
            std::process::exit(EXIT_STORE_CORRUPT);
        }
        Err(e) => {
            error!("replay store unavailable: {e}");
            std::process::exit(1);
        }
    };

    let ledger = Arc::new(HostLedger::new());
    let internal_adapter = Arc::new(InternalChainAdapter::new(
        ledger,
        internal_chain.required_confirmations,
    ));
    let ethereum_adapter = args.eth_ws_url.as_ref().map(|url| {
        Arc::new(EthereumAdapter::new(EthereumAdapterConfig {
            ws_url: url.clone(),
            bridge_contract: args.eth_bridge_contract.clone(),
            relayer_account: args.eth_relayer_account.clone(),
            native_symbol: "ETH".to_string(),
            call_timeout: config.submit_timeout,
            required_confirmations: ethereum_chain.required_confirmations,
            poll_interval: config.confirm_poll_interval,
        }))
    });

    let manager = Arc::new(TransferManager::new(config.manager_config()));
    if let Err(e) = register_everything(
        &manager,
        internal_chain,
        ethereum_chain,
        internal_adapter.clone(),
        ethereum_adapter.clone(),
    ) {
        error!("registration failed: {e}");
        std::process::exit(EXIT_REGISTRATION_FAILED);
    }
    if let Err(e) = manager.start() {
        error!("manager start failed: {e}");
        std::process::exit(EXIT_REGISTRATION_FAILED);
    }

    let engine = Arc::new(RelayEngine::new(
        manager.clone(),
        replay.clone(),
        config.engine_config(),
    ));
    engine.add_source(internal_adapter.clone()).await;
    if let Some(adapter) = ethereum_adapter {
        engine.add_source(adapter).await;
    }
    if let Err(e) = engine.start().await {
        error!("engine start failed: {e}");
        std::process::exit(EXIT_REGISTRATION_FAILED);
    }
    let mut fatal = engine
        .take_fatal()
        .await
        .expect("fatal channel taken once");

    let api = BridgeApi::new(
        manager.clone(),
        replay.clone(),
        engine.stats(),
        engine.health(),
    );
    let (_http_addr, _http_task) = match api.spawn(args.http_addr) {
        Ok(bound) => bound,
        Err(e) => {
            error!("http bind failed: {e}");
            std::process::exit(1);
        }
    };
    let (_ws_addr, _ws_task) = match ws::spawn_log_stream(manager.clone(), args.ws_addr).await {
        Ok(bound) => bound,
        Err(e) => {
            error!("ws bind failed: {e}");
            std::process::exit(1);
        }
    };

    // Retention pruning, hourly.
    {
        let replay = replay.clone();
        let retention = config.replay_retention;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                let cutoff = chrono::Utc::now().timestamp_millis() - retention.as_millis() as i64;
                match replay.prune(cutoff) {
                    Ok(0) => {}
                    Ok(removed) => info!("pruned {removed} replay records"),
                    Err(e) => error!("replay prune failed: {e}"),
                }
            }
        });
    }

    info!("✅ bridged up");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            engine.shutdown().await;
            info!("🧹 clean shutdown");
        }
        fatal_err = fatal.recv() => {
            if let Some(e) = fatal_err {
                error!("fatal replay store failure: {e}");
                std::process::exit(EXIT_STORE_CORRUPT);
            }
        }
    }
}
