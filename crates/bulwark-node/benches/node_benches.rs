//! Criterion benchmarks for bulwark-node hot paths.
//!
//! Covers: cache hits, IP penalty updates, and a full decision on a missing account.

use std::net::IpAddr;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bulwark_core::types::{Hash256, LoginAttempt};
use bulwark_credentials::HashParams;
use bulwark_decay::HalfLife;
use bulwark_node_lib::ip_history::IpHistory;
use bulwark_node_lib::{DecisionEngine, MemoryAccountStore, NodeConfig, SelfLoadingCache};
use bulwark_sketch::{AgingMembershipSketch, BinomialLadderSketch};
use chrono::Utc;

fn bench_cache_hit(c: &mut Criterion) {
    let cache: SelfLoadingCache<u64, u64> = SelfLoadingCache::new("bench", 10_000);
    for i in 0..10_000 {
        cache.insert(i, i);
    }

    c.bench_function("cache_hit", |b| b.iter(|| cache.get(black_box(&4_242))));
}

fn bench_ip_penalize(c: &mut Criterion) {
    let half_life = HalfLife::from_secs(12 * 3600).unwrap();
    let now = Utc::now();
    let mut history = IpHistory::new(16, now);

    c.bench_function("ip_penalize", |b| {
        b.iter(|| history.penalize(black_box(half_life), black_box(5.0), black_box(now)))
    });
}

fn bench_decide_missing_account(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut config = NodeConfig::default();
    config.hashing = HashParams::insecure_fast();
    config.membership.columns = 1 << 16;

    let engine = runtime.block_on(async {
        let store = Arc::new(MemoryAccountStore::new(config.engine.credit_half_life, 16));
        let ladder = Arc::new(BinomialLadderSketch::new(1 << 20, config.ladder.height).unwrap());
        let membership = Arc::new(AgingMembershipSketch::new(&config.membership).unwrap());
        DecisionEngine::new(&config, store, ladder, membership).unwrap()
    });
    let client_ip: IpAddr = "192.0.2.1".parse().unwrap();
    let mut counter = 0u64;

    c.bench_function("decide_missing_account", |b| {
        b.iter(|| {
            counter += 1;
            let attempt = LoginAttempt {
                id: Hash256::digest(&counter.to_le_bytes()),
                account_id: "nobody".into(),
                client_ip,
                server_ip: None,
                timestamp: Utc::now(),
                device_cookie_hash: None,
            };
            runtime.block_on(engine.decide(&attempt, "hunter2")).unwrap()
        })
    });
}

criterion_group!(benches, bench_cache_hit, bench_ip_penalize, bench_decide_missing_account);
criterion_main!(benches);
