// src/llm/rotator.rs
//! Credential pools and round-robin key selection over the healthy subset.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm::health::KeyHealthTracker;

/// Name of a provider family ("groq", "gemini", ...). Family order in the
/// registry is fallback priority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderFamily(String);

impl ProviderFamily {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderFamily {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Stable identity of a credential: family plus position in its pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CredentialId {
    pub family: ProviderFamily,
    pub ordinal: usize,
}

/// One API key bound to one provider family.
#[derive(Clone)]
pub struct Credential {
    family: ProviderFamily,
    ordinal: usize,
    secret: String,
    fingerprint: String,
}

impl Credential {
    pub fn new(family: ProviderFamily, ordinal: usize, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        let fingerprint = fingerprint(&secret);
        Self {
            family,
            ordinal,
            secret,
            fingerprint,
        }
    }

    pub fn id(&self) -> CredentialId {
        CredentialId {
            family: self.family.clone(),
            ordinal: self.ordinal,
        }
    }

    pub fn family(&self) -> &ProviderFamily {
        &self.family
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Raw key material. Only adapters should read this.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Short SHA-256 prefix, safe for logs and reports.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

// Never print the secret, not even in debug output.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("family", &self.family)
            .field("ordinal", &self.ordinal)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

fn fingerprint(secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(secret.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Ordered credentials of one family plus the rotation cursor.
#[derive(Debug)]
pub struct ProviderPool {
    family: ProviderFamily,
    credentials: Vec<Credential>,
    cursor: Mutex<usize>,
}

impl ProviderPool {
    pub fn new<I, S>(family: ProviderFamily, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let credentials = secrets
            .into_iter()
            .enumerate()
            .map(|(i, s)| Credential::new(family.clone(), i, s))
            .collect();
        Self {
            family,
            credentials,
            cursor: Mutex::new(0),
        }
    }

    pub fn family(&self) -> &ProviderFamily {
        &self.family
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Current cursor value (diagnostics/tests).
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }
}

/// Picks the next credential of a pool, skipping keys the tracker considers
/// unhealthy. The pool cursor lock is held for the whole decision so
/// concurrent callers are serialized per pool.
#[derive(Debug, Clone)]
pub struct KeyRotator {
    tracker: Arc<KeyHealthTracker>,
}

impl KeyRotator {
    pub fn new(tracker: Arc<KeyHealthTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<KeyHealthTracker> {
        &self.tracker
    }

    /// Next healthy credential, or `None` when the pool has nothing to offer.
    pub fn next(&self, pool: &ProviderPool) -> Option<Credential> {
        self.next_at(pool, Utc::now())
    }

    pub fn next_at(&self, pool: &ProviderPool, now: DateTime<Utc>) -> Option<Credential> {
        self.next_excluding_at(pool, &[], now)
    }

    /// Like [`next`](Self::next) but never hands out an ordinal in `tried`.
    ///
    /// The cursor is shared by every caller of the pool, so a request that
    /// retries must say which keys it already used.
    pub fn next_excluding(&self, pool: &ProviderPool, tried: &[usize]) -> Option<Credential> {
        self.next_excluding_at(pool, tried, Utc::now())
    }

    pub fn next_excluding_at(
        &self,
        pool: &ProviderPool,
        tried: &[usize],
        now: DateTime<Utc>,
    ) -> Option<Credential> {
        let mut cursor = pool.cursor.lock();

        let mut healthy = self.tracker.healthy_in(&pool.credentials);
        if healthy.is_empty() && !pool.is_empty() {
            let recovered = self.tracker.attempt_recovery_at(now);
            if recovered > 0 {
                info!(family = %pool.family, recovered, "recovery pass before selection");
            }
            healthy = self.tracker.healthy_in(&pool.credentials);
        }

        if healthy.is_empty() {
            warn!(
                family = %pool.family,
                pool_size = pool.len(),
                "no healthy credential available"
            );
            return None;
        }

        let start = *cursor % healthy.len();
        let Some(idx) = (0..healthy.len())
            .map(|step| (start + step) % healthy.len())
            .find(|&i| !tried.contains(&healthy[i].ordinal()))
        else {
            debug!(
                family = %pool.family,
                healthy = healthy.len(),
                tried = tried.len(),
                "every healthy credential already tried"
            );
            return None;
        };
        let chosen = healthy[idx].clone();
        *cursor = (idx + 1) % healthy.len();

        debug!(
            family = %pool.family,
            ordinal = chosen.ordinal(),
            key = chosen.fingerprint(),
            healthy = healthy.len(),
            "selected credential"
        );
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::health::HealthPolicy;

    fn setup(n: usize) -> (KeyRotator, ProviderPool) {
        let tracker = Arc::new(KeyHealthTracker::new(HealthPolicy::default()));
        let pool = ProviderPool::new(
            ProviderFamily::new("groq"),
            (0..n).map(|i| format!("gsk_test_{i}")),
        );
        tracker.register_pool(&pool);
        (KeyRotator::new(tracker), pool)
    }

    #[test]
    fn round_robin_over_healthy_keys() {
        let (rot, pool) = setup(3);
        let picked: Vec<usize> = (0..5)
            .map(|_| rot.next(&pool).unwrap().ordinal())
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn unhealthy_keys_are_skipped() {
        let (rot, pool) = setup(2);
        let first = rot.next(&pool).unwrap();
        assert_eq!(first.ordinal(), 0);
        for _ in 0..3 {
            rot.tracker().record_failure(&first, "HTTP 503: upstream unavailable");
        }
        for _ in 0..4 {
            assert_eq!(rot.next(&pool).unwrap().ordinal(), 1);
        }
    }

    #[test]
    fn tried_ordinals_are_skipped_without_losing_rotation() {
        let (rot, pool) = setup(3);
        // Another caller already moved the cursor onto key 0.
        assert_eq!(rot.next_excluding(&pool, &[0]).unwrap().ordinal(), 1);
        assert_eq!(pool.cursor(), 2);
        assert_eq!(rot.next_excluding(&pool, &[0, 2]).unwrap().ordinal(), 1);
        assert!(rot.next_excluding(&pool, &[0, 1, 2]).is_none());
        assert_eq!(rot.next(&pool).unwrap().ordinal(), 2);
    }

    #[test]
    fn empty_pool_yields_none() {
        let (rot, pool) = setup(0);
        assert!(rot.next(&pool).is_none());
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn debug_output_hides_secret() {
        let c = Credential::new(ProviderFamily::new("Gemini"), 4, "AIzaSecretValue");
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("AIzaSecretValue"));
        assert!(dbg.contains("gemini"));
        assert_eq!(c.fingerprint().len(), 12);
    }
}
