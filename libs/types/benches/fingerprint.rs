//! Canonical encoder throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use primitive_types::U256;
use types::{fingerprint, ChainId, Fingerprint, TokenRef, TransferEvent};

fn sample_event() -> TransferEvent {
    TransferEvent {
        chain_id: ChainId::Ethereum,
        tx_id: "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b".to_string(),
        log_index: 3,
        from: "0x742d35Cc6634C0532925a3b844Bc454e4438f44e".to_string(),
        to: "bh1234deadbeefcafe".to_string(),
        token: TokenRef::erc20(
            "USDC",
            "USD Coin",
            6,
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            ChainId::Ethereum,
        ),
        amount: U256::from(2_500_000_000u64),
        block_height: 19_000_000,
        observed_at_ms: 1_700_000_000_000,
    }
}

fn bench_fingerprint(c: &mut Criterion) {
    let event = sample_event();

    c.bench_function("canonical_encoding", |b| {
        b.iter(|| fingerprint::canonical_encoding(black_box(&event)))
    });

    c.bench_function("fingerprint_keccak", |b| {
        b.iter(|| Fingerprint::of(black_box(&event)))
    });
}

criterion_group!(benches, bench_fingerprint);
criterion_main!(benches);
