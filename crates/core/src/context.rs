//! Top-level SDK handle.
//!
//! A [`MediationContext`] owns every stateful subsystem for one SDK instance.
//! Independent contexts share nothing, so tests and multiple hosts in one
//! process do not interfere.

use std::sync::Arc;

use arc_swap::ArcSwap;
use error_stack::Report;

use crate::auction::{AuctionClient, AuctionTransport, BidHandle, BidOptions, BidOutcome};
use crate::breaker::BreakerRegistry;
use crate::cache::{AdCache, CachedAd};
use crate::clock::{Clock, SystemClock};
use crate::connectivity::ConnectivityMonitor;
use crate::consent::{ConsentInput, ConsentState};
use crate::error::MediationError;
use crate::settings::Settings;
use crate::stats::AuctionStats;
use crate::threading::ThreadAffinity;

pub struct MediationContext {
    settings: Settings,
    client: Arc<AuctionClient>,
    consent: ArcSwap<ConsentState>,
}

impl MediationContext {
    /// Context on the system clock with the default HTTP transport.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let client = AuctionClient::new(&settings, clock);
        Self::from_client(settings, client)
    }

    /// Parse settings from TOML (with env overrides) and build a context.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the settings are invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<MediationError>> {
        Settings::from_toml(toml_str).map(Self::new)
    }

    /// Context with injected collaborators.
    #[must_use]
    pub fn with_components(
        settings: Settings,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn AuctionTransport>,
        threading: Arc<dyn ThreadAffinity>,
    ) -> Self {
        let client = AuctionClient::new(&settings, clock)
            .with_transport(transport)
            .with_thread_affinity(threading);
        Self::from_client(settings, client)
    }

    fn from_client(settings: Settings, client: AuctionClient) -> Self {
        Self {
            settings,
            client: Arc::new(client),
            consent: ArcSwap::from_pointee(ConsentState::default()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the consent snapshot used by subsequent requests.
    pub fn set_consent(&self, input: ConsentInput) -> Arc<ConsentState> {
        let state = Arc::new(ConsentState::new(input));
        log::info!(
            "consent: updated (gdpr_applies={:?}, tcf_version={})",
            state.gdpr_applies,
            state.tcf.version
        );
        self.consent.store(Arc::clone(&state));
        state
    }

    #[must_use]
    pub fn consent(&self) -> Arc<ConsentState> {
        self.consent.load_full()
    }

    /// Blocking bid with the current consent. Call off the main thread.
    pub fn request_bid(&self, options: &BidOptions) -> BidOutcome {
        let consent = self.consent();
        self.client.request_bid(options, &consent)
    }

    /// Bid on a worker thread; `callback` runs on the main thread.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error if the worker thread cannot be spawned.
    pub fn request_bid_async<F>(
        &self,
        options: BidOptions,
        callback: F,
    ) -> Result<BidHandle, Report<MediationError>>
    where
        F: FnOnce(BidOutcome) + Send + 'static,
    {
        self.client
            .request_bid_async(options, self.consent(), callback)
    }

    /// Consume the cached ad for `placement_id` for display.
    pub fn take_ad(&self, placement_id: &str) -> Option<CachedAd> {
        self.client.cache().consume(placement_id)
    }

    #[must_use]
    pub fn is_ready(&self, placement_id: &str) -> bool {
        self.client.cache().is_ready(placement_id)
    }

    #[must_use]
    pub fn client(&self) -> &Arc<AuctionClient> {
        &self.client
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<AdCache> {
        self.client.cache()
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.client.breakers()
    }

    #[must_use]
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        self.client.connectivity()
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<AuctionStats> {
        self.client.stats()
    }
}
