//! Adversarial property tests for the decision engine.
//!
//! Attack vectors tested:
//! - Arbitrary usernames and passwords (empty, unicode, very long)
//! - Resubmitting the same wrong password to farm or reset penalties
//! - Cycling correct logins to wash an IP's block score beyond the account's credit
//! - Replaying attempt ids with different payloads

use proptest::prelude::*;

use bulwark_core::types::Outcome;
use bulwark_tests::helpers::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

const ALL_OUTCOMES: [Outcome; 6] = [
    Outcome::CredentialsValid,
    Outcome::CredentialsValidButBlocked,
    Outcome::CredentialsInvalidIncorrectPassword,
    Outcome::CredentialsInvalidRepeatedIncorrectPassword,
    Outcome::CredentialsInvalidNoSuchAccount,
    Outcome::CredentialsInvalidRepeatedNoSuchAccount,
];

// ---------------------------------------------------------------------------
// Test 1: arbitrary_inputs_always_decide
//
// Attack vector: malformed or hostile input strings must never turn into an
// engine error or an undetermined result.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn arbitrary_inputs_always_decide(
        account in "\\PC{0,40}",
        password in "\\PC{0,80}",
        create in any::<bool>(),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let h = local_engine(&fast_config());
            if create {
                h.engine.create_account(account.as_str().into(), "Real-Password-1", t0()).await.unwrap();
            }
            let record = h
                .engine
                .decide(&attempt(1, &account, ip("192.0.2.1")), &password)
                .await
                .unwrap();
            prop_assert!(ALL_OUTCOMES.contains(&record.outcome));
            if !create {
                prop_assert_eq!(record.outcome, Outcome::CredentialsInvalidNoSuchAccount);
            }
            Ok(())
        })?;
    }
}

// ---------------------------------------------------------------------------
// Test 2: resubmission_costs_nothing_more
//
// Attack vector: an attacker replays the same wrong password many times. Only
// the first failure is charged, so replays neither help nor hurt.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn resubmission_costs_nothing_more(repeats in 1u64..12, existing in any::<bool>()) {
        let rt = runtime();
        rt.block_on(async {
            let h = local_engine(&fast_config());
            let client = ip("198.51.100.2");
            if existing {
                h.engine.create_account("target".into(), "the-real-one", t0()).await.unwrap();
            }
            h.engine.decide(&attempt(0, "target", client), "guess").await.unwrap();
            let charged = h.engine.block_score(client, t0());
            prop_assert!(charged > 0.0);

            for seq in 1..=repeats {
                let record = h.engine.decide(&attempt(seq, "target", client), "guess").await.unwrap();
                prop_assert!(!record.outcome.is_first_failure());
            }
            prop_assert_eq!(h.engine.block_score(client, t0()), charged);
            Ok(())
        })?;
    }
}

// ---------------------------------------------------------------------------
// Test 3: credit_cannot_wash_more_than_limit
//
// Attack vector: an attacker who owns one account alternates guesses with
// correct logins to that account, hoping each success erases the guesses.
// Across any number of successes the account can offset at most its limit.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn credit_cannot_wash_more_than_limit(rounds in 1usize..8, guesses_per_round in 1usize..6) {
        let rt = runtime();
        rt.block_on(async {
            let config = fast_config();
            let limit = config.engine.account_credit_limit;
            let h = local_engine(&config);
            let client = ip("203.0.113.99");
            h.engine.create_account("mule".into(), "mule-password", t0()).await.unwrap();

            let mut seq = 0u64;
            let mut charged = 0.0;
            for round in 0..rounds {
                for g in 0..guesses_per_round {
                    seq += 1;
                    let before = h.engine.block_score(client, t0());
                    h.engine
                        .decide(&attempt(seq, &format!("ghost-{round}-{g}"), client), "spray")
                        .await
                        .unwrap();
                    charged += h.engine.block_score(client, t0()) - before;
                }
                seq += 1;
                h.engine.decide(&attempt(seq, "mule", client), "mule-password").await.unwrap();
            }
            let washed = charged - h.engine.block_score(client, t0());
            prop_assert!(washed <= limit + 1e-9, "washed {} with limit {}", washed, limit);
            Ok(())
        })?;
    }
}

// ---------------------------------------------------------------------------
// Test 4: replayed_id_returns_first_decision
//
// Attack vector: replaying a decided attempt id with a different password
// must not re-score, so a replay cannot turn a rejection into an acceptance.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn replayed_id_returns_first_decision(first in "[a-z]{1,12}", second in "[a-z]{1,12}") {
        let rt = runtime();
        rt.block_on(async {
            let h = local_engine(&fast_config());
            h.engine.create_account("victim".into(), &second, t0()).await.unwrap();
            let a = attempt(42, "victim", ip("192.0.2.42"));
            let original = h.engine.decide(&a, &first).await.unwrap();
            let replay = h.engine.decide(&a, &second).await.unwrap();
            prop_assert_eq!(original, replay);
            Ok(())
        })?;
    }
}
