// src/llm/health.rs
//! Per-credential health bookkeeping.
//!
//! A credential turns unhealthy after `failure_threshold` consecutive failures
//! and comes back only through `attempt_recovery` once the cooldown has passed
//! since its last failure. Errors matching a permanent-disable pattern
//! (billing, delinquent accounts) deactivate the key for good; only a manual
//! `reset` brings it back.
//!
//! The tracker never fails. It records and answers.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::llm::rotator::{Credential, CredentialId, ProviderFamily, ProviderPool};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECS: i64 = 15 * 60;

/// Substrings (case-insensitive) that mark an error as a billing/account
/// problem rather than a transient one.
pub fn default_disable_patterns() -> Vec<String> {
    ["payment", "delinquent", "billing", "insufficient_quota"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub cooldown: Duration,
    pub disable_patterns: Vec<String>,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::seconds(DEFAULT_COOLDOWN_SECS),
            disable_patterns: default_disable_patterns(),
        }
    }
}

impl HealthPolicy {
    pub fn is_permanent(&self, error_text: &str) -> bool {
        let lower = error_text.to_ascii_lowercase();
        self.disable_patterns
            .iter()
            .any(|p| !p.is_empty() && lower.contains(&p.to_ascii_lowercase()))
    }
}

/// Health state of one credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyHealthRecord {
    pub consecutive_failures: u32,
    pub is_active: bool,
    pub is_healthy: bool,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub disabled_reason: Option<String>,
}

impl Default for KeyHealthRecord {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            is_active: true,
            is_healthy: true,
            last_failure_at: None,
            last_success_at: None,
            total_successes: 0,
            total_failures: 0,
            disabled_reason: None,
        }
    }
}

impl KeyHealthRecord {
    pub fn total_requests(&self) -> u64 {
        self.total_successes + self.total_failures
    }

    /// Percentage; 100 for keys that were never used.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 100.0;
        }
        self.total_successes as f64 / total as f64 * 100.0
    }
}

#[derive(Debug)]
struct Entry {
    fingerprint: String,
    record: KeyHealthRecord,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CredentialId, Entry>,
    // Registration order, so reports follow configuration order.
    order: Vec<CredentialId>,
}

impl Inner {
    fn entry(&mut self, cred: &Credential) -> &mut Entry {
        let id = cred.id();
        if !self.entries.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entries.entry(id).or_insert_with(|| Entry {
            fingerprint: cred.fingerprint().to_string(),
            record: KeyHealthRecord::default(),
        })
    }
}

#[derive(Debug)]
pub struct KeyHealthTracker {
    policy: HealthPolicy,
    inner: Mutex<Inner>,
}

impl KeyHealthTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Create a fresh record for a credential if it has none yet.
    pub fn register(&self, cred: &Credential) {
        self.inner.lock().entry(cred);
    }

    pub fn register_pool(&self, pool: &ProviderPool) {
        let mut inner = self.inner.lock();
        for cred in pool.credentials() {
            inner.entry(cred);
        }
    }

    pub fn record_success(&self, cred: &Credential) {
        self.record_success_at(cred, Utc::now());
    }

    pub fn record_success_at(&self, cred: &Credential, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        let rec = &mut inner.entry(cred).record;
        rec.consecutive_failures = 0;
        rec.last_success_at = Some(now);
        rec.total_successes += 1;
        rec.is_healthy = rec.is_active;
    }

    pub fn record_failure(&self, cred: &Credential, error_text: &str) {
        self.record_failure_at(cred, error_text, Utc::now());
    }

    pub fn record_failure_at(&self, cred: &Credential, error_text: &str, now: DateTime<Utc>) {
        let permanent = self.policy.is_permanent(error_text);
        let threshold = self.policy.failure_threshold;

        let mut inner = self.inner.lock();
        let rec = &mut inner.entry(cred).record;
        let was_healthy = rec.is_healthy;

        rec.consecutive_failures += 1;
        rec.total_failures += 1;
        rec.last_failure_at = Some(now);
        if permanent && rec.is_active {
            rec.is_active = false;
            rec.disabled_reason = Some(error_text.chars().take(200).collect());
            counter!("llm_key_disabled_total", "family" => cred.family().to_string())
                .increment(1);
            warn!(
                family = %cred.family(),
                ordinal = cred.ordinal(),
                key = cred.fingerprint(),
                "credential deactivated by billing/account error"
            );
        }
        rec.is_healthy = rec.is_active && rec.consecutive_failures < threshold;

        if was_healthy && !rec.is_healthy {
            warn!(
                family = %cred.family(),
                ordinal = cred.ordinal(),
                key = cred.fingerprint(),
                consecutive_failures = rec.consecutive_failures,
                active = rec.is_active,
                "credential marked unhealthy"
            );
        }
    }

    /// Unknown credentials count as fresh, hence healthy.
    pub fn is_healthy(&self, cred: &Credential) -> bool {
        self.inner
            .lock()
            .entries
            .get(&cred.id())
            .map(|e| e.record.is_healthy)
            .unwrap_or(true)
    }

    /// Healthy members of `creds`, in the given order.
    pub fn healthy_in<'a>(&self, creds: &'a [Credential]) -> Vec<&'a Credential> {
        let inner = self.inner.lock();
        creds
            .iter()
            .filter(|c| {
                inner
                    .entries
                    .get(&c.id())
                    .map(|e| e.record.is_healthy)
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn attempt_recovery(&self) -> usize {
        self.attempt_recovery_at(Utc::now())
    }

    /// Restore every active, unhealthy credential whose cooldown has elapsed.
    /// Returns how many were restored.
    pub fn attempt_recovery_at(&self, now: DateTime<Utc>) -> usize {
        let cooldown = self.policy.cooldown;
        let mut inner = self.inner.lock();
        let Inner { entries, order } = &mut *inner;

        let mut recovered = 0usize;
        for id in order.iter() {
            let Some(entry) = entries.get_mut(id) else {
                continue;
            };
            let rec = &mut entry.record;
            if rec.is_healthy || !rec.is_active {
                continue;
            }
            let cooled = rec
                .last_failure_at
                .map(|t| now - t >= cooldown)
                .unwrap_or(true);
            if cooled {
                rec.consecutive_failures = 0;
                rec.is_healthy = true;
                recovered += 1;
                info!(
                    family = %id.family,
                    ordinal = id.ordinal,
                    key = %entry.fingerprint,
                    "credential recovered after cooldown"
                );
            }
        }
        if recovered > 0 {
            counter!("llm_key_recovered_total").increment(recovered as u64);
        }
        recovered
    }

    /// Snapshot of one record.
    pub fn record(&self, cred: &Credential) -> Option<KeyHealthRecord> {
        self.inner
            .lock()
            .entries
            .get(&cred.id())
            .map(|e| e.record.clone())
    }

    /// Manual recovery: replace the record with a fresh one. This is the only
    /// way back for a deactivated key.
    pub fn reset(&self, cred: &Credential) {
        let mut inner = self.inner.lock();
        inner.entry(cred).record = KeyHealthRecord::default();
        info!(
            family = %cred.family(),
            ordinal = cred.ordinal(),
            key = cred.fingerprint(),
            "credential health reset"
        );
    }

    pub fn deactivate(&self, cred: &Credential, reason: &str) {
        let mut inner = self.inner.lock();
        let rec = &mut inner.entry(cred).record;
        rec.is_active = false;
        rec.is_healthy = false;
        rec.disabled_reason = Some(reason.to_string());
        warn!(
            family = %cred.family(),
            ordinal = cred.ordinal(),
            key = cred.fingerprint(),
            reason,
            "credential manually deactivated"
        );
    }

    pub fn healthy_count(&self, family: &ProviderFamily) -> usize {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(id, e)| &id.family == family && e.record.is_healthy)
            .count()
    }

    pub fn report(&self) -> HealthReport {
        let inner = self.inner.lock();
        let mut families: Vec<FamilyHealth> = Vec::new();

        for id in &inner.order {
            let Some(entry) = inner.entries.get(id) else {
                continue;
            };
            let view = KeyHealthView {
                ordinal: id.ordinal,
                fingerprint: entry.fingerprint.clone(),
                success_rate: round2(entry.record.success_rate()),
                record: entry.record.clone(),
            };
            match families.iter_mut().find(|f| f.family == id.family) {
                Some(f) => f.keys.push(view),
                None => families.push(FamilyHealth {
                    family: id.family.clone(),
                    total_keys: 0,
                    healthy_keys: 0,
                    keys: vec![view],
                }),
            }
        }

        let mut report = HealthReport::default();
        for f in families.iter_mut() {
            f.total_keys = f.keys.len();
            f.healthy_keys = f.keys.iter().filter(|k| k.record.is_healthy).count();
            report.total_keys += f.total_keys;
            report.healthy_keys += f.healthy_keys;
            report.disabled_keys += f.keys.iter().filter(|k| !k.record.is_active).count();
            for k in &f.keys {
                report.total_requests += k.record.total_requests();
                report.total_failures += k.record.total_failures;
            }
        }
        report.unhealthy_keys = report.total_keys - report.healthy_keys;
        report.overall_success_rate = if report.total_requests == 0 {
            100.0
        } else {
            round2(
                (report.total_requests - report.total_failures) as f64
                    / report.total_requests as f64
                    * 100.0,
            )
        };
        report.families = families;
        report
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub total_keys: usize,
    pub healthy_keys: usize,
    pub unhealthy_keys: usize,
    pub disabled_keys: usize,
    pub total_requests: u64,
    pub total_failures: u64,
    pub overall_success_rate: f64,
    pub families: Vec<FamilyHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyHealth {
    pub family: ProviderFamily,
    pub total_keys: usize,
    pub healthy_keys: usize,
    pub keys: Vec<KeyHealthView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyHealthView {
    pub ordinal: usize,
    pub fingerprint: String,
    pub success_rate: f64,
    #[serde(flatten)]
    pub record: KeyHealthRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(ordinal: usize) -> Credential {
        Credential::new(ProviderFamily::new("groq"), ordinal, format!("k{ordinal}"))
    }

    #[test]
    fn threshold_failures_turn_key_unhealthy_until_cooldown() {
        let tracker = KeyHealthTracker::new(HealthPolicy::default());
        let c = cred(0);
        let t0 = Utc::now();

        tracker.record_failure_at(&c, "HTTP 503", t0);
        tracker.record_failure_at(&c, "HTTP 503", t0);
        assert!(tracker.is_healthy(&c), "two failures stay below threshold");
        tracker.record_failure_at(&c, "HTTP 503", t0);
        assert!(!tracker.is_healthy(&c));

        assert_eq!(tracker.attempt_recovery_at(t0 + Duration::minutes(14)), 0);
        assert!(!tracker.is_healthy(&c));

        assert_eq!(tracker.attempt_recovery_at(t0 + Duration::minutes(15)), 1);
        assert!(tracker.is_healthy(&c));
        assert_eq!(tracker.record(&c).unwrap().consecutive_failures, 0);
    }

    #[test]
    fn billing_errors_disable_permanently() {
        let tracker = KeyHealthTracker::new(HealthPolicy::default());
        let c = cred(1);
        let t0 = Utc::now();
        tracker.record_failure_at(&c, "HTTP 400: organization has delinquent Payment", t0);

        let rec = tracker.record(&c).unwrap();
        assert!(!rec.is_active);
        assert!(!rec.is_healthy);
        assert_eq!(rec.consecutive_failures, 1);

        assert_eq!(tracker.attempt_recovery_at(t0 + Duration::days(30)), 0);
        assert!(!tracker.is_healthy(&c));

        // Success does not reactivate a disabled key either.
        tracker.record_success_at(&c, t0 + Duration::days(31));
        assert!(!tracker.is_healthy(&c));

        tracker.reset(&c);
        assert!(tracker.is_healthy(&c));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let tracker = KeyHealthTracker::new(HealthPolicy::default());
        let c = cred(2);
        tracker.record_failure(&c, "timeout after 60s");
        tracker.record_failure(&c, "timeout after 60s");
        tracker.record_success(&c);
        tracker.record_failure(&c, "timeout after 60s");
        tracker.record_failure(&c, "timeout after 60s");
        let rec = tracker.record(&c).unwrap();
        assert!(rec.is_healthy);
        assert_eq!(rec.consecutive_failures, 2);
        assert_eq!(rec.total_failures, 4);
        assert_eq!(rec.total_successes, 1);
        assert!(rec.last_success_at.is_some());
    }

    #[test]
    fn custom_threshold_is_honoured() {
        let policy = HealthPolicy {
            failure_threshold: 1,
            cooldown: Duration::seconds(10),
            disable_patterns: vec![],
        };
        let tracker = KeyHealthTracker::new(policy);
        let c = cred(0);
        let t0 = Utc::now();
        tracker.record_failure_at(&c, "payment required", t0);
        assert!(!tracker.is_healthy(&c));
        // No disable patterns configured: the key is only cooling down.
        assert_eq!(tracker.attempt_recovery_at(t0 + Duration::seconds(10)), 1);
    }

    #[test]
    fn report_groups_by_family_in_registration_order() {
        let tracker = KeyHealthTracker::new(HealthPolicy::default());
        let groq = ProviderPool::new(ProviderFamily::new("groq"), ["a", "b"]);
        let gemini = ProviderPool::new(ProviderFamily::new("gemini"), ["c"]);
        tracker.register_pool(&groq);
        tracker.register_pool(&gemini);

        tracker.record_success(&groq.credentials()[0]);
        tracker.deactivate(&gemini.credentials()[0], "manual");

        let report = tracker.report();
        assert_eq!(report.total_keys, 3);
        assert_eq!(report.healthy_keys, 2);
        assert_eq!(report.unhealthy_keys, 1);
        assert_eq!(report.disabled_keys, 1);
        assert_eq!(report.families[0].family.as_str(), "groq");
        assert_eq!(report.families[1].family.as_str(), "gemini");
        assert_eq!(report.families[0].keys[0].success_rate, 100.0);

        let json = serde_json::to_value(&report).unwrap();
        let key = &json["families"][0]["keys"][0];
        assert!(key.get("fingerprint").is_some());
        assert!(key.get("is_healthy").is_some());
        assert!(!json.to_string().contains("\"a\""));
    }
}
