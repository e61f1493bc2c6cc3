//! Fleet tests: several nodes in one process, sharing ladder shards over a
//! loopback transport and accounts through one durable store.
//!
//! Failure modes exercised:
//! - A shard owner that is unreachable or slow leaves the height unknown,
//!   which rates the password as popular, but never fails or stalls a
//!   decision.
//! - An IP owner that cannot be reached has its attempts decided locally.
//! - A host-set change re-routes shards without disturbing decisions.

use std::time::{Duration, Instant};

use bulwark_core::traits::PasswordPopularity;
use bulwark_core::types::{Hash256, Outcome};
use bulwark_credentials::popularity_key;
use bulwark_tests::helpers::*;

// ---------------------------------------------------------------------------
// Shared popularity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn steps_on_one_node_are_seen_by_all() {
    let fleet = Fleet::start(3);
    let key = popularity_key("correcthorse");
    let before = fleet.nodes[1].ladder().height(&key).await.unwrap();

    for _ in 0..10 {
        fleet.nodes[0].ladder().step(&key).await;
    }
    for node in &fleet.nodes {
        assert!(node.ladder().height(&key).await.unwrap() >= before + 8);
    }
}

#[tokio::test]
async fn shards_spread_across_hosts() {
    let fleet = Fleet::start(3);
    let mut owners = std::collections::HashSet::new();
    for i in 0..64u32 {
        owners.insert(fleet.owner_index(&Hash256::digest(&i.to_le_bytes())));
    }
    assert!(owners.len() >= 2, "all shards on one host");
}

// ---------------------------------------------------------------------------
// Decisions across nodes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn account_created_on_one_node_decides_on_another() {
    let fleet = Fleet::start(3);
    fleet.nodes[0]
        .engine()
        .create_account("alice".into(), "tr0ub4dor", t0())
        .await
        .unwrap();

    let record = fleet.nodes[2]
        .decide(&attempt(1, "alice", ip("192.0.2.1")), "tr0ub4dor")
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::CredentialsValid);
}

#[tokio::test]
async fn guesses_spread_over_hosts_share_one_block_score() {
    let fleet = Fleet::start(2);
    fleet.nodes[0]
        .engine()
        .create_account("alice".into(), "Tr0ub4dor&3", t0())
        .await
        .unwrap();
    let attacker = ip("203.0.113.50");
    let owner = fleet.ip_owner_index(attacker);
    let other = 1 - owner;

    // 120 distinct wrong guesses, alternating front-end hosts. Unpopular
    // passwords cost 5 each: 600 in total, 300 per host if they were kept
    // apart. The unpopular-password threshold is 500.
    for n in 0..120u64 {
        let node = &fleet.nodes[(n % 2) as usize];
        let record = node
            .decide(&attempt(n, "alice", attacker), &format!("guess-{n}-x"))
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::CredentialsInvalidIncorrectPassword);
    }

    let penalty = fleet.nodes[owner].engine().config().invalid_password_penalty;
    let owner_score = fleet.nodes[owner].engine().block_score(attacker, t0());
    assert!((owner_score - 120.0 * penalty).abs() < 1e-6, "owner score {owner_score}");
    assert_eq!(fleet.nodes[other].engine().block_score(attacker, t0()), 0.0);

    // The correct password through the host that does not own the IP is
    // still judged against the whole score.
    let record = fleet.nodes[other]
        .decide(&attempt(1_000, "alice", attacker), "Tr0ub4dor&3")
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::CredentialsValidButBlocked);
}

#[tokio::test]
async fn unreachable_ip_owner_falls_back_to_local_decision() {
    let fleet = Fleet::start(2);
    fleet.nodes[0]
        .engine()
        .create_account("bob".into(), "hunter2hunter2", t0())
        .await
        .unwrap();
    let client = ip("198.51.100.77");
    let owner = fleet.ip_owner_index(client);
    let other = 1 - owner;

    fleet.transport.set_unreachable(&Fleet::host(owner), true);
    let record = fleet.nodes[other]
        .decide(&attempt(1, "bob", client), "wrong-guess")
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::CredentialsInvalidIncorrectPassword);
    assert!(fleet.nodes[other].engine().block_score(client, t0()) > 0.0);
    assert_eq!(fleet.nodes[owner].engine().block_score(client, t0()), 0.0);

    let record = fleet.nodes[other]
        .decide(&attempt(2, "bob", client), "hunter2hunter2")
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::CredentialsValid);
}

// ---------------------------------------------------------------------------
// Degraded shard owners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_shard_owner_rates_password_popular() {
    let fleet = Fleet::start(3);
    let key = popularity_key("123456");
    let owner = fleet.owner_index(&key);
    let observer = (owner + 1) % 3;
    let client = ip("192.0.2.9");

    fleet.transport.set_unreachable(&Fleet::host(owner), true);
    assert_eq!(fleet.nodes[observer].ladder().height(&key).await, None);

    let engine = fleet.nodes[observer].engine();
    let record = engine
        .decide(&attempt(1, "nobody", client), "123456")
        .await
        .unwrap();
    assert_eq!(record.outcome, Outcome::CredentialsInvalidNoSuchAccount);
    assert_eq!(record.password_height, None);

    // Full popular-password penalty, not the unpopular one.
    let config = fleet.nodes[observer].config();
    let expected = config.engine.invalid_account_penalty * config.popularity.max_penalty_multiplier;
    assert!((engine.block_score(client, t0()) - expected).abs() < 1e-6);

    fleet.transport.set_unreachable(&Fleet::host(owner), false);
    assert!(fleet.nodes[observer].ladder().height(&key).await.is_some());
}

#[tokio::test]
async fn slow_shard_owner_is_cut_off_by_deadline() {
    let fleet = Fleet::start(3);
    let key = popularity_key("qwerty");
    let owner = fleet.owner_index(&key);
    let observer = (owner + 1) % 3;
    let timeout = Duration::from_millis(fleet.nodes[observer].config().fleet.call_timeout_ms);

    fleet
        .transport
        .set_delay(&Fleet::host(owner), Some(timeout * 20));
    let started = Instant::now();
    let record = fleet.nodes[observer]
        .engine()
        .decide(&attempt(1, "nobody", ip("192.0.2.10")), "qwerty")
        .await
        .unwrap();
    assert_eq!(record.password_height, None);
    assert!(started.elapsed() < timeout * 10, "decision took {:?}", started.elapsed());
}

// ---------------------------------------------------------------------------
// Host-set changes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn removing_a_host_reroutes_its_shards() {
    let fleet = Fleet::start(3);
    let ladder = fleet.nodes[0].ladder();
    let generation = ladder
        .set_hosts(vec![Fleet::host(0), Fleet::host(1)])
        .unwrap();
    assert_eq!(generation, 1);

    for shard in 0..fleet.nodes[0].config().ladder.shard_count {
        assert_ne!(ladder.owner_of_shard(shard), Fleet::host(2));
    }

    // Host 2 can go away entirely without affecting node 0's readings.
    fleet.transport.set_unreachable(&Fleet::host(2), true);
    let key = popularity_key("dragon");
    let before = ladder
        .height(&key)
        .await
        .expect("remaining owners answer");
    for _ in 0..5 {
        ladder.step(&key).await;
    }
    let after = ladder.height(&key).await.expect("remaining owners answer");
    assert!(after >= before + 4, "height went from {before} to {after}");
    assert!(ladder.set_hosts(Vec::new()).is_err());
}
