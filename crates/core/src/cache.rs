//! TTL-bound, single-use store of the latest ad per placement.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::auction::types::Winner;
use crate::clock::{Clock, SystemClock};

/// An ad ready to be shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedAd {
    pub placement_id: String,
    /// Bid or request identifier the ad was won under.
    pub id: String,
    pub network_name: String,
    pub ecpm: f64,
    pub creative: Option<String>,
    pub expiry_at_ms: i64,
}

impl CachedAd {
    #[must_use]
    pub fn from_winner(placement_id: &str, id: &str, winner: &Winner) -> Self {
        Self {
            placement_id: placement_id.to_string(),
            id: winner.bid_id.clone().unwrap_or_else(|| id.to_string()),
            network_name: winner.adapter.clone(),
            ecpm: winner.ecpm(),
            creative: winner.ad_markup.clone(),
            expiry_at_ms: 0,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expiry_at_ms
    }
}

/// Keyed by placement id; at most one entry per placement.
pub struct AdCache {
    entries: DashMap<String, CachedAd>,
    clock: Arc<dyn Clock>,
}

impl AdCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Store `ad` for `placement_id`, replacing any previous entry.
    pub fn put(&self, placement_id: &str, mut ad: CachedAd, ttl_ms: u64) {
        let ttl = i64::try_from(ttl_ms).unwrap_or(i64::MAX);
        ad.placement_id = placement_id.to_string();
        ad.expiry_at_ms = self.clock.now_ms().saturating_add(ttl);
        log::debug!(
            "cache: stored {} for {placement_id} (ttl {ttl_ms} ms)",
            ad.network_name
        );
        self.entries.insert(placement_id.to_string(), ad);
    }

    /// The unexpired entry for `placement_id`, without consuming it.
    #[must_use]
    pub fn peek(&self, placement_id: &str) -> Option<CachedAd> {
        let now = self.clock.now_ms();
        self.entries
            .get(placement_id)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value().clone())
    }

    /// Remove and return the entry if it is present and unexpired.
    ///
    /// Of any number of concurrent callers, at most one receives the ad.
    pub fn consume(&self, placement_id: &str) -> Option<CachedAd> {
        let now = self.clock.now_ms();
        if let Some((_, ad)) = self
            .entries
            .remove_if(placement_id, |_, ad| !ad.is_expired_at(now))
        {
            log::debug!("cache: consumed {} for {placement_id}", ad.network_name);
            return Some(ad);
        }
        self.evict_if_expired(placement_id, now);
        None
    }

    /// Whether an unexpired ad is waiting. Prunes an expired entry it finds.
    #[must_use]
    pub fn is_ready(&self, placement_id: &str) -> bool {
        let now = self.clock.now_ms();
        let ready = self
            .entries
            .get(placement_id)
            .is_some_and(|entry| !entry.is_expired_at(now));
        if !ready {
            self.evict_if_expired(placement_id, now);
        }
        ready
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, ad| !ad.is_expired_at(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            log::debug!("cache: pruned {removed} expired entries");
        }
        removed
    }

    /// Number of stored entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_if_expired(&self, placement_id: &str, now: i64) {
        if self
            .entries
            .remove_if(placement_id, |_, ad| ad.is_expired_at(now))
            .is_some()
        {
            log::debug!("cache: evicted expired entry for {placement_id}");
        }
    }
}

impl Default for AdCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}
