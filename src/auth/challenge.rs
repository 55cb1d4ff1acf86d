//! Pending second-factor challenges.
//!
//! Login parks a short-lived code here and the session is only issued once
//! it is redeemed. The map is process-local; deployments scaling past one
//! instance swap in an implementation over a shared KV store.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::crypto::constant_time_eq;

/// A pending code lives five minutes.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on simultaneously pending challenges.
const MAX_PENDING: usize = 10_000;

/// Single-use challenge storage with per-entry TTL. One pending code per
/// subject; a new login replaces it.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn put(&self, user_id: i64, code: String);

    /// Consume the pending code if it matches and has not expired. A
    /// mismatch leaves the entry in place; expiry evicts it.
    async fn redeem(&self, user_id: i64, code: &str) -> bool;
}

struct Pending {
    code: String,
    expires_at: Instant,
}

pub struct InMemoryChallengeStore {
    ttl: Duration,
    pending: Mutex<HashMap<i64, Pending>>,
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self::with_ttl(CHALLENGE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn evict_expired(pending: &mut HashMap<i64, Pending>, now: Instant) {
        pending.retain(|_, entry| entry.expires_at > now);
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn put(&self, user_id: i64, code: String) {
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap();

        Self::evict_expired(&mut pending, now);

        // Bounded: when full, the entry closest to expiry gives way.
        if pending.len() >= MAX_PENDING && !pending.contains_key(&user_id) {
            if let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(id, _)| *id)
            {
                pending.remove(&oldest);
            }
        }

        pending.insert(
            user_id,
            Pending {
                code,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn redeem(&self, user_id: i64, code: &str) -> bool {
        let now = Instant::now();
        let mut pending = self.pending.lock().unwrap();

        let Some(entry) = pending.get(&user_id) else {
            return false;
        };

        if entry.expires_at <= now {
            pending.remove(&user_id);
            return false;
        }

        if constant_time_eq(&entry.code, code) {
            pending.remove(&user_id);
            return true;
        }

        false
    }
}
