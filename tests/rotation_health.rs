// tests/rotation_health.rs
//
// Rotation and key-health properties against the public llm surface.
// Time-dependent checks use the `_at` variants with explicit timestamps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;

use upsc_news_enricher::llm::{
    HealthPolicy, KeyHealthTracker, KeyRotator, ProviderFamily, ProviderPool,
};

fn pool_of(n: usize) -> (Arc<KeyHealthTracker>, KeyRotator, ProviderPool) {
    let tracker = Arc::new(KeyHealthTracker::new(HealthPolicy::default()));
    let pool = ProviderPool::new(
        ProviderFamily::new("groq"),
        (0..n).map(|i| format!("gsk_it_{i}")),
    );
    tracker.register_pool(&pool);
    let rotator = KeyRotator::new(tracker.clone());
    (tracker, rotator, pool)
}

#[test]
fn three_healthy_keys_rotate_in_cyclic_order() {
    let (_t, rot, pool) = pool_of(3);
    let got: Vec<usize> = (0..5)
        .map(|_| rot.next(&pool).expect("healthy key").ordinal())
        .collect();
    assert_eq!(got, vec![0, 1, 2, 0, 1]);
}

#[test]
fn threshold_failures_make_key_unhealthy_until_cooldown() {
    let (tracker, _rot, pool) = pool_of(1);
    let cred = &pool.credentials()[0];
    let t0 = Utc::now();

    tracker.record_failure_at(cred, "HTTP 503: overloaded", t0);
    tracker.record_failure_at(cred, "HTTP 503: overloaded", t0);
    assert!(tracker.is_healthy(cred), "two failures stay under the threshold");
    tracker.record_failure_at(cred, "HTTP 503: overloaded", t0);
    assert!(!tracker.is_healthy(cred));

    assert_eq!(tracker.attempt_recovery_at(t0 + ChronoDuration::minutes(14)), 0);
    assert!(!tracker.is_healthy(cred));

    assert_eq!(tracker.attempt_recovery_at(t0 + ChronoDuration::minutes(15)), 1);
    assert!(tracker.is_healthy(cred));
    let rec = tracker.record(cred).unwrap();
    assert_eq!(rec.consecutive_failures, 0);
    assert_eq!(rec.total_failures, 3);
}

#[test]
fn permanently_disabled_key_never_recovers() {
    let (tracker, rot, pool) = pool_of(1);
    let cred = &pool.credentials()[0];
    let t0 = Utc::now();

    tracker.record_failure_at(
        cred,
        "HTTP 402: {\"error\":\"account is delinquent, update payment method\"}",
        t0,
    );
    assert!(!tracker.is_healthy(cred));
    assert_eq!(tracker.attempt_recovery_at(t0 + ChronoDuration::days(30)), 0);
    assert!(rot.next_at(&pool, t0 + ChronoDuration::days(30)).is_none());

    tracker.reset(cred);
    assert!(tracker.is_healthy(cred));
}

#[test]
fn rate_limit_quota_text_is_not_permanent() {
    let (tracker, _rot, pool) = pool_of(1);
    let cred = &pool.credentials()[0];
    tracker.record_failure(cred, "HTTP 429: Resource has been exhausted (e.g. check quota).");
    let rec = tracker.record(cred).unwrap();
    assert!(rec.is_active);
    assert!(rec.is_healthy);
}

#[test]
fn next_recovers_a_fully_unhealthy_pool_before_giving_up() {
    let (tracker, rot, pool) = pool_of(2);
    let t0 = Utc::now();
    for cred in pool.credentials() {
        for _ in 0..3 {
            tracker.record_failure_at(cred, "timeout after 60s", t0);
        }
    }
    assert!(rot.next_at(&pool, t0 + ChronoDuration::minutes(1)).is_none());

    let picked = rot
        .next_at(&pool, t0 + ChronoDuration::minutes(16))
        .expect("recovered key");
    assert_eq!(picked.ordinal(), 0, "recovery keeps pool order");
    assert_eq!(tracker.healthy_count(pool.family()), 2);
}

#[test]
fn failing_key_is_skipped_while_the_other_keeps_serving() {
    let (tracker, rot, pool) = pool_of(2);
    assert_eq!(rot.next(&pool).unwrap().ordinal(), 0);
    assert_eq!(rot.next(&pool).unwrap().ordinal(), 1);

    let first = pool.credentials()[0].clone();
    for _ in 0..3 {
        tracker.record_failure(&first, "HTTP 500: internal");
    }
    for _ in 0..4 {
        assert_eq!(rot.next(&pool).unwrap().ordinal(), 1);
    }
}

#[test]
fn empty_pool_yields_none() {
    let (_t, rot, pool) = pool_of(0);
    assert!(rot.next(&pool).is_none());
}

#[test]
fn report_counts_keys_by_state() {
    let (tracker, _rot, pool) = pool_of(3);
    let creds = pool.credentials();
    tracker.record_success(&creds[0]);
    for _ in 0..3 {
        tracker.record_failure(&creds[1], "HTTP 500");
    }
    tracker.deactivate(&creds[2], "revoked by operator");

    let report = tracker.report();
    assert_eq!(report.total_keys, 3);
    assert_eq!(report.healthy_keys, 1);
    assert_eq!(report.disabled_keys, 1);
    assert_eq!(report.families.len(), 1);
    assert_eq!(report.families[0].family.as_str(), "groq");

    let json = serde_json::to_string(&report).unwrap();
    assert!(!json.contains("gsk_it_"), "secrets must not appear in reports");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_keeps_cursor_in_bounds() {
    let (tracker, rot, pool) = pool_of(3);
    let pool = Arc::new(pool);
    let rot = Arc::new(rot);

    let mut set = tokio::task::JoinSet::new();
    for task in 0..16u64 {
        let pool = pool.clone();
        let rot = rot.clone();
        let tracker = tracker.clone();
        set.spawn(async move {
            for i in 0..25u64 {
                let jitter = rand::rng().random_range(0..3);
                tokio::time::sleep(Duration::from_millis(jitter)).await;
                if let Some(cred) = rot.next(&pool) {
                    if (task + i) % 7 == 0 {
                        tracker.record_failure(&cred, "HTTP 503");
                    } else {
                        tracker.record_success(&cred);
                    }
                }
                let healthy = tracker.healthy_in(pool.credentials()).len();
                assert!(pool.cursor() < healthy.max(pool.len()));
            }
        });
    }
    while let Some(res) = set.join_next().await {
        res.expect("rotation task panicked");
    }
    assert!(pool.cursor() < pool.len());
}
