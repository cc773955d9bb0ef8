//! Bid request orchestration.
//!
//! A request is validated, preflighted against connectivity, built from the
//! current consent, then sent through the placement's circuit breaker. Each
//! attempt is classified; transient failures are retried with backoff inside
//! the total budget, and a winner is stored in the ad cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use uuid::Uuid;

use super::classify::{classify_error, classify_response, Classified};
use super::retry::RetryPolicy;
use super::transport::{AuctionTransport, TransportRequest, UreqTransport};
use super::types::{BidOptions, BidOutcome, BidRequest, FailureReason, UserInfo, Winner};
use crate::breaker::{BreakerRegistry, CallError};
use crate::cache::{AdCache, CachedAd};
use crate::clock::Clock;
use crate::connectivity::{ConnectivityMonitor, NetworkState, Preflight};
use crate::consent::ConsentState;
use crate::constants::{AUCTION_PATH, AUCTION_TYPE_HEADER_BIDDING, WORKER_THREAD_NAME};
use crate::error::{IntoFailureReason, MediationError};
use crate::logging::mask_key;
use crate::settings::{AuctionSettings, Settings};
use crate::stats::AuctionStats;
use crate::threading::{Headless, ThreadAffinity};

/// Client for `POST /v1/auction`.
pub struct AuctionClient {
    settings: AuctionSettings,
    retry: RetryPolicy,
    transport: Arc<dyn AuctionTransport>,
    clock: Arc<dyn Clock>,
    breakers: Arc<BreakerRegistry>,
    cache: Arc<AdCache>,
    connectivity: Arc<ConnectivityMonitor>,
    threading: Arc<dyn ThreadAffinity>,
    stats: Arc<AuctionStats>,
}

impl AuctionClient {
    /// Build a client whose cache, breakers and connectivity monitor all run
    /// on `clock`. The transport defaults to [`UreqTransport`] and the thread
    /// affinity to [`Headless`].
    #[must_use]
    pub fn new(settings: &Settings, clock: Arc<dyn Clock>) -> Self {
        log::debug!(
            "auction: client for {} (key {})",
            settings.auction.base_url,
            mask_key(&settings.auction.api_key)
        );
        Self {
            retry: RetryPolicy::from_settings(&settings.auction),
            settings: settings.auction.clone(),
            transport: Arc::new(UreqTransport::new()),
            breakers: Arc::new(BreakerRegistry::new(
                settings.breaker.clone(),
                Arc::clone(&clock),
            )),
            cache: Arc::new(AdCache::new(Arc::clone(&clock))),
            connectivity: Arc::new(ConnectivityMonitor::new(&settings.connectivity)),
            threading: Arc::new(Headless),
            stats: Arc::new(AuctionStats::new()),
            clock,
        }
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn AuctionTransport>) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_thread_affinity(mut self, threading: Arc<dyn ThreadAffinity>) -> Self {
        self.threading = threading;
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<AdCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    #[must_use]
    pub fn with_connectivity(mut self, connectivity: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = connectivity;
        self
    }

    #[must_use]
    pub fn with_stats(mut self, stats: Arc<AuctionStats>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<AdCache> {
        &self.cache
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<AuctionStats> {
        &self.stats
    }

    #[must_use]
    pub fn thread_affinity(&self) -> &Arc<dyn ThreadAffinity> {
        &self.threading
    }

    /// Request a bid, blocking until an outcome is known.
    ///
    /// Must not be called on the main thread; doing so returns `main_thread`
    /// immediately.
    pub fn request_bid(&self, options: &BidOptions, consent: &ConsentState) -> BidOutcome {
        self.execute(options, consent, &AtomicBool::new(false))
    }

    /// Request a bid on a worker thread and deliver the outcome to `callback`
    /// on the main thread.
    ///
    /// # Errors
    ///
    /// Returns a `Transport` error if the worker thread cannot be spawned.
    pub fn request_bid_async<F>(
        self: &Arc<Self>,
        options: BidOptions,
        consent: Arc<ConsentState>,
        callback: F,
    ) -> Result<BidHandle, Report<MediationError>>
    where
        F: FnOnce(BidOutcome) + Send + 'static,
    {
        let abandoned = Arc::new(AtomicBool::new(false));
        let client = Arc::clone(self);
        let flag = Arc::clone(&abandoned);

        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let outcome = client.execute(&options, &consent, &flag);
                if flag.load(Ordering::SeqCst) {
                    log::debug!(
                        "auction {}: abandoned, dropping {}",
                        options.placement_id,
                        outcome.label()
                    );
                    return;
                }
                client.threading.post_to_main(Box::new(move || {
                    if !flag.load(Ordering::SeqCst) {
                        callback(outcome);
                    }
                }));
            })
            .change_context(MediationError::Transport {
                message: "failed to spawn auction worker".to_string(),
            })?;

        Ok(BidHandle {
            abandoned,
            worker: Some(worker),
        })
    }

    fn execute(
        &self,
        options: &BidOptions,
        consent: &ConsentState,
        abandoned: &AtomicBool,
    ) -> BidOutcome {
        let outcome = if self.threading.is_main_thread() {
            log::warn!(
                "auction {}: request_bid called on the main thread",
                options.placement_id
            );
            BidOutcome::failure_with_detail(
                FailureReason::MainThread,
                "request_bid must run off the main thread",
            )
        } else {
            self.run(options, consent, abandoned)
        };
        self.stats.record_outcome(&outcome);
        outcome
    }

    fn run(
        &self,
        options: &BidOptions,
        consent: &ConsentState,
        abandoned: &AtomicBool,
    ) -> BidOutcome {
        let placement_id = options.placement_id.trim();
        if placement_id.is_empty() {
            return rejected("placement_id is empty");
        }
        if self.settings.app_id.trim().is_empty() {
            return rejected("app_id is empty");
        }

        let state = match self.connectivity.preflight() {
            Preflight::Proceed(state) => state,
            Preflight::FastFail { reason, .. } => {
                log::info!("auction {placement_id}: fast-fail ({reason})");
                return BidOutcome::failure_with_detail(
                    FailureReason::NetworkError,
                    format!("fast-fail: {reason}"),
                );
            }
        };

        let requested = Duration::from_millis(
            options
                .timeout_ms
                .unwrap_or(self.settings.default_timeout_ms),
        );
        let timeout = requested.min(self.connectivity.effective_timeout());
        let request = self.build_request(placement_id, options, consent, timeout, &state);
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(err) => {
                return BidOutcome::failure_with_detail(
                    FailureReason::Error,
                    format!("failed to encode bid request: {err}"),
                );
            }
        };
        let mut transport_request = TransportRequest {
            url: self.endpoint(),
            api_key: self.settings.api_key.clone(),
            user_agent: self.settings.user_agent.clone(),
            body,
            timeout,
        };

        let breaker = self.breakers.get(placement_id);
        let started = self.clock.monotonic_ms();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            // No attempt may outlive the remaining total budget.
            let elapsed = self.elapsed_since(started);
            transport_request.timeout = timeout.min(self.retry.remaining(elapsed));
            self.stats.record_attempt();
            log::debug!(
                "auction {placement_id}: attempt {attempt}/{} (request {}, timeout {} ms)",
                self.retry.max_attempts,
                request.request_id,
                transport_request.timeout.as_millis()
            );

            let result = breaker.execute(
                || self.attempt(&transport_request),
                |classified: &Classified| {
                    classified
                        .outcome
                        .reason()
                        .is_some_and(FailureReason::trips_breaker)
                },
            );
            let Classified {
                outcome,
                retry_after,
            } = match result {
                Ok(winner) => return self.store_winner(placement_id, &request.request_id, winner),
                Err(CallError::Open) => {
                    log::info!("auction {placement_id}: circuit open, skipping network call");
                    return BidOutcome::failure(FailureReason::CircuitOpen);
                }
                Err(CallError::Failed(classified)) => classified,
            };

            let Some(reason) = outcome.reason() else {
                return outcome;
            };
            if !reason.is_transient() || attempt >= self.retry.max_attempts {
                log::info!("auction {placement_id}: {reason} after {attempt} attempt(s)");
                return outcome;
            }
            if abandoned.load(Ordering::SeqCst) {
                log::debug!("auction {placement_id}: abandoned after {reason}, not retrying");
                return outcome;
            }

            let delay = self.retry.next_delay(attempt, retry_after);
            let elapsed = self.elapsed_since(started);
            if !self.retry.fits_budget(elapsed, delay) {
                log::info!(
                    "auction {placement_id}: {reason}, retry in {} ms exceeds budget",
                    delay.as_millis()
                );
                return outcome;
            }

            log::debug!(
                "auction {placement_id}: {reason}, retrying in {} ms",
                delay.as_millis()
            );
            self.clock.sleep(delay);
            if abandoned.load(Ordering::SeqCst) {
                return outcome;
            }
        }
    }

    fn attempt(&self, request: &TransportRequest) -> Result<Winner, Classified> {
        let classified = match self.transport.post(request) {
            Ok(response) => classify_response(&response, self.now()),
            Err(report) => {
                log::debug!("auction: transport failure: {report:?}");
                classify_error(&report)
            }
        };
        match classified {
            Classified {
                outcome: BidOutcome::Winner(winner),
                ..
            } => Ok(winner),
            failed => Err(failed),
        }
    }

    fn store_winner(&self, placement_id: &str, request_id: &str, winner: Winner) -> BidOutcome {
        let ttl_ms = winner.ttl_ms.unwrap_or(self.settings.default_ttl_ms);
        self.cache.put(
            placement_id,
            CachedAd::from_winner(placement_id, request_id, &winner),
            ttl_ms,
        );
        log::info!(
            "auction {placement_id}: winner {} at {:.4} {}",
            winner.adapter,
            winner.ecpm(),
            winner.currency
        );
        BidOutcome::Winner(winner)
    }

    fn build_request(
        &self,
        placement_id: &str,
        options: &BidOptions,
        consent: &ConsentState,
        timeout: Duration,
        state: &NetworkState,
    ) -> BidRequest {
        let mut device_info = options.device.clone();
        if device_info.user_agent.is_empty() {
            device_info.user_agent.clone_from(&self.settings.user_agent);
        }
        if device_info.connection_type.is_empty() {
            device_info.connection_type = state.network_type.as_str().to_string();
        }

        let advertising_id = options
            .advertising_id
            .clone()
            .filter(|_| consent.allows_advertising_id());

        BidRequest {
            request_id: Uuid::new_v4().to_string(),
            app_id: self.settings.app_id.clone(),
            placement_id: placement_id.to_string(),
            ad_type: options.ad_type,
            device_info,
            user_info: UserInfo {
                advertising_id,
                limit_ad_tracking: consent.limit_ad_tracking == Some(true),
                consent_string: consent.tcf_string.clone(),
            },
            floor_cpm: options.floor_cpm,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            auction_type: AUCTION_TYPE_HEADER_BIDDING.to_string(),
            adapters: options.adapters.clone(),
            metadata: consent.metadata(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.settings.base_url.trim_end_matches('/'),
            AUCTION_PATH
        )
    }

    fn elapsed_since(&self, started_ms: u64) -> Duration {
        Duration::from_millis(self.clock.monotonic_ms().saturating_sub(started_ms))
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_ms()).unwrap_or_else(Utc::now)
    }
}

/// Outcome for a request refused before any network work.
fn rejected(message: &str) -> BidOutcome {
    let err = MediationError::InvalidInput {
        message: message.to_string(),
    };
    BidOutcome::failure_with_detail(err.failure_reason(), err.to_string())
}

/// Handle to a bid running on a worker thread.
#[derive(Debug)]
pub struct BidHandle {
    abandoned: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl BidHandle {
    /// Stop retries and suppress delivery. An attempt already in flight still
    /// completes and is still recorded by the breaker.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.is_finished(),
            None => true,
        }
    }

    /// Block until the worker exits. Returns `false` if it panicked.
    pub fn wait(mut self) -> bool {
        match self.worker.take() {
            Some(worker) => worker.join().is_ok(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auction::transport::TransportResponse;
    use crate::breaker::BreakerState;
    use crate::clock::ManualClock;
    use crate::consent::ConsentInput;
    use crate::test_support::tests::{create_test_settings, ScriptedTransport};
    use crate::threading::MainThreadQueue;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Barrier;

    fn winner_body(adapter: &str, cpm: f64) -> String {
        json!({
            "winner": {
                "bid_id": "bid-1",
                "adapter_name": adapter,
                "cpm": cpm,
                "ad_markup": "<div/>"
            }
        })
        .to_string()
    }

    fn client_with(
        script: Vec<Result<TransportResponse, MediationError>>,
    ) -> (AuctionClient, Arc<ScriptedTransport>, Arc<ManualClock>) {
        client_with_settings(create_test_settings(), script)
    }

    fn client_with_settings(
        settings: Settings,
        script: Vec<Result<TransportResponse, MediationError>>,
    ) -> (AuctionClient, Arc<ScriptedTransport>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let transport = Arc::new(ScriptedTransport::new(script));
        let client = AuctionClient::new(&settings, Arc::clone(&clock) as Arc<dyn Clock>)
            .with_transport(Arc::clone(&transport) as Arc<dyn AuctionTransport>);
        (client, transport, clock)
    }

    fn timeout() -> MediationError {
        MediationError::Timeout {
            message: "deadline exceeded".to_string(),
        }
    }

    #[test]
    fn winner_is_returned_and_cached() {
        let (client, transport, _clock) =
            client_with(vec![Ok(TransportResponse::new(200, winner_body("admob", 1.5)))]);

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        let BidOutcome::Winner(winner) = outcome else {
            unreachable!("expected a winner, got {outcome:?}");
        };
        assert_eq!(winner.adapter, "admob");
        assert!((winner.ecpm() - 1.5).abs() < f64::EPSILON);
        assert!(client.cache().is_ready("pl1"));

        let cached = client.cache().peek("pl1").expect("cached ad");
        assert_eq!(cached.id, "bid-1");
        assert_eq!(cached.network_name, "admob");
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn request_carries_endpoint_headers_and_body() {
        let (client, transport, _clock) =
            client_with(vec![Ok(TransportResponse::new(204, ""))]);
        let consent = ConsentState::new(ConsentInput {
            gdpr_applies: Some(true),
            us_privacy: Some("1YNN".to_string()),
            ..Default::default()
        });
        let options = BidOptions::new("pl1")
            .with_floor_cpm(0.5)
            .with_adapters(vec!["admob".to_string()])
            .with_advertising_id("gaid-1");

        let _ = client.request_bid(&options, &consent);

        let requests = transport.requests();
        let request = &requests[0];
        assert!(request.url.ends_with("/v1/auction"));
        assert!(!request.api_key.is_empty());
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("request body is JSON");
        assert_eq!(body["placement_id"], "pl1");
        assert_eq!(body["app_id"], "test-app");
        assert_eq!(body["ad_type"], "banner");
        assert_eq!(body["floor_cpm"], 0.5);
        assert_eq!(body["adapters"], json!(["admob"]));
        assert_eq!(body["auction_type"], "header_bidding");
        assert_eq!(body["user_info"]["advertising_id"], "gaid-1");
        assert_eq!(body["user_info"]["limit_ad_tracking"], false);
        assert_eq!(body["metadata"]["gdpr_applies"], "1");
        assert_eq!(body["metadata"]["us_privacy"], "1YNN");
        assert_eq!(body["device_info"]["connection_type"], "unknown");
        assert!(!body["request_id"].as_str().unwrap_or_default().is_empty());
    }

    #[test]
    fn advertising_id_is_withheld_when_tracking_is_limited() {
        let (client, transport, _clock) =
            client_with(vec![Ok(TransportResponse::new(204, ""))]);
        let consent = ConsentState::new(ConsentInput {
            limit_ad_tracking: Some(true),
            ..Default::default()
        });

        let _ = client.request_bid(
            &BidOptions::new("pl1").with_advertising_id("gaid-1"),
            &consent,
        );

        let body: serde_json::Value =
            serde_json::from_slice(&transport.requests()[0].body).expect("JSON body");
        assert!(body["user_info"].get("advertising_id").is_none());
        assert_eq!(body["user_info"]["limit_ad_tracking"], true);
    }

    #[test]
    fn no_fill_leaves_cache_untouched() {
        let (client, transport, clock) = client_with(vec![Ok(TransportResponse::new(204, ""))]);

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::NoFill));
        assert!(client.cache().is_empty());
        assert_eq!(transport.requests().len(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn timeouts_are_retried_with_growing_backoff() {
        let (client, transport, clock) =
            client_with(vec![Err(timeout()), Err(timeout()), Err(timeout())]);

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::Timeout));
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(120), Duration::from_millis(240)]
        );
    }

    #[test]
    fn rate_limit_honors_retry_after_and_retries() {
        let (client, transport, clock) = client_with(vec![
            Ok(TransportResponse::new(429, "").with_retry_after("2")),
            Ok(TransportResponse::new(200, winner_body("unity", 0.8))),
        ]);

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert!(outcome.is_winner());
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (client, transport, _clock) =
            client_with(vec![Ok(TransportResponse::new(400, "bad request"))]);

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::ClientStatus(400)));
        assert_eq!(outcome.label(), "status_400");
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(
            client.breakers().get("pl1").snapshot().consecutive_failures,
            0
        );
    }

    #[test]
    fn server_errors_open_the_breaker_and_later_requests_short_circuit() {
        let (client, transport, _clock) = client_with(vec![
            Ok(TransportResponse::new(500, "")),
            Ok(TransportResponse::new(502, "")),
            Ok(TransportResponse::new(503, "")),
            Ok(TransportResponse::new(204, "")),
        ]);

        let first = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());
        assert_eq!(first.reason(), Some(FailureReason::ServerStatus(503)));
        assert_eq!(client.breakers().get("pl1").state(), BreakerState::Open);

        let second = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());
        assert_eq!(second.reason(), Some(FailureReason::CircuitOpen));
        assert_eq!(transport.requests().len(), 3);

        // Breakers are per placement.
        let other = client.request_bid(&BidOptions::new("pl2"), &ConsentState::default());
        assert_eq!(other.reason(), Some(FailureReason::NoFill));
        assert_eq!(transport.requests().len(), 4);
    }

    #[test]
    fn retries_stop_when_budget_is_spent() {
        let mut settings = create_test_settings();
        settings.auction.total_budget_ms = 200;
        let (client, transport, clock) = client_with_settings(
            settings,
            vec![
                Ok(TransportResponse::new(500, "")),
                Ok(TransportResponse::new(500, "")),
                Ok(TransportResponse::new(500, "")),
            ],
        );

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::ServerStatus(500)));
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(120)]);
    }

    /// Transport that stalls for the full per-call timeout, then times out.
    struct StallingTransport {
        clock: Arc<ManualClock>,
        timeouts: Mutex<Vec<Duration>>,
    }

    impl AuctionTransport for StallingTransport {
        fn post(
            &self,
            request: &TransportRequest,
        ) -> Result<TransportResponse, Report<MediationError>> {
            self.timeouts.lock().push(request.timeout);
            self.clock.advance(request.timeout);
            Err(Report::new(timeout()))
        }
    }

    fn stalling_client(
        settings: &Settings,
    ) -> (AuctionClient, Arc<StallingTransport>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let transport = Arc::new(StallingTransport {
            clock: Arc::clone(&clock),
            timeouts: Mutex::new(Vec::new()),
        });
        let client = AuctionClient::new(settings, Arc::clone(&clock) as Arc<dyn Clock>)
            .with_transport(Arc::clone(&transport) as Arc<dyn AuctionTransport>);
        (client, transport, clock)
    }

    #[test]
    fn attempts_never_outlive_total_budget() {
        let (client, transport, clock) = stalling_client(&create_test_settings());

        let options = BidOptions::new("pl1").with_timeout_ms(10_000);
        let outcome = client.request_bid(&options, &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::Timeout));
        // 10 s + 120 ms backoff leaves 4880 ms of the 15 s budget.
        assert_eq!(
            *transport.timeouts.lock(),
            vec![Duration::from_millis(10_000), Duration::from_millis(4_880)]
        );
        assert_eq!(clock.monotonic_ms(), 15_000);
    }

    #[test]
    fn last_attempt_gets_only_the_remaining_budget() {
        let mut settings = create_test_settings();
        settings.auction.total_budget_ms = 3_000;
        let (client, transport, clock) = stalling_client(&settings);

        let options = BidOptions::new("pl1").with_timeout_ms(1_000);
        let outcome = client.request_bid(&options, &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::Timeout));
        assert_eq!(
            *transport.timeouts.lock(),
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(1_000),
                Duration::from_millis(640),
            ]
        );
        assert!(clock.monotonic_ms() <= 3_000);
    }

    #[test]
    fn empty_placement_is_rejected_without_network() {
        let (client, transport, _clock) = client_with(vec![]);

        let outcome = client.request_bid(&BidOptions::new("  "), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::InvalidPlacement));
        let BidOutcome::Failure(failure) = outcome else {
            unreachable!("expected a failure");
        };
        assert_eq!(
            failure.detail.as_deref(),
            Some("Invalid input: placement_id is empty")
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn empty_app_id_is_rejected_without_network() {
        let mut settings = create_test_settings();
        settings.auction.app_id = " ".to_string();
        let (client, transport, _clock) = client_with_settings(settings, vec![]);

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::InvalidPlacement));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn offline_fast_fails_without_touching_breaker() {
        let (client, transport, _clock) = client_with(vec![]);
        client.connectivity().on_network_lost();

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        let BidOutcome::Failure(failure) = outcome else {
            unreachable!("offline request cannot win");
        };
        assert_eq!(failure.reason, FailureReason::NetworkError);
        assert_eq!(failure.detail.as_deref(), Some("fast-fail: offline"));
        assert!(transport.requests().is_empty());
        assert!(client.breakers().is_empty());
    }

    #[test]
    fn per_call_timeout_is_bounded_by_connectivity() {
        let (client, transport, _clock) = client_with(vec![
            Ok(TransportResponse::new(204, "")),
            Ok(TransportResponse::new(204, "")),
            Ok(TransportResponse::new(204, "")),
        ]);

        let _ = client.request_bid(
            &BidOptions::new("pl1").with_timeout_ms(500),
            &ConsentState::default(),
        );
        let _ = client.request_bid(
            &BidOptions::new("pl1").with_timeout_ms(60_000),
            &ConsentState::default(),
        );
        let _ = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        let timeouts: Vec<Duration> = transport
            .requests()
            .iter()
            .map(|request| request.timeout)
            .collect();
        assert_eq!(
            timeouts,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(10),
                Duration::from_millis(2000),
            ]
        );
    }

    #[test]
    fn main_thread_calls_fail_fast() {
        let (client, transport, _clock) = client_with(vec![]);
        let client = client.with_thread_affinity(Arc::new(MainThreadQueue::new()));

        let outcome = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());

        assert_eq!(outcome.reason(), Some(FailureReason::MainThread));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn async_outcome_is_delivered_on_main_thread() {
        let (client, _transport, _clock) =
            client_with(vec![Ok(TransportResponse::new(200, winner_body("admob", 1.5)))]);
        let queue = Arc::new(MainThreadQueue::new());
        let client = Arc::new(
            client.with_thread_affinity(Arc::clone(&queue) as Arc<dyn ThreadAffinity>),
        );

        let delivered = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&delivered);
        let main = thread::current().id();
        let handle = client
            .request_bid_async(
                BidOptions::new("pl1"),
                Arc::new(ConsentState::default()),
                move |outcome| *sink.lock() = Some((thread::current().id(), outcome)),
            )
            .expect("worker should spawn");
        assert!(handle.wait());

        assert!(delivered.lock().is_none(), "nothing runs before drain");
        assert_eq!(queue.drain(), 1);
        let (thread_id, outcome) = delivered.lock().take().expect("outcome delivered");
        assert_eq!(thread_id, main);
        assert!(outcome.is_winner());
    }

    /// Transport that parks inside the first call until released.
    struct GatedTransport {
        entered: Barrier,
        release: Barrier,
        calls: Mutex<usize>,
    }

    impl AuctionTransport for GatedTransport {
        fn post(
            &self,
            _request: &TransportRequest,
        ) -> Result<TransportResponse, Report<MediationError>> {
            *self.calls.lock() += 1;
            self.entered.wait();
            self.release.wait();
            Ok(TransportResponse::new(500, ""))
        }
    }

    #[test]
    fn abandoned_request_stops_retrying_but_breaker_records_outcome() {
        let transport = Arc::new(GatedTransport {
            entered: Barrier::new(2),
            release: Barrier::new(2),
            calls: Mutex::new(0),
        });
        let clock = Arc::new(ManualClock::default());
        let client = Arc::new(
            AuctionClient::new(&create_test_settings(), clock as Arc<dyn Clock>)
                .with_transport(Arc::clone(&transport) as Arc<dyn AuctionTransport>),
        );

        let delivered = Arc::new(AtomicBool::new(false));
        let sink = Arc::clone(&delivered);
        let handle = client
            .request_bid_async(
                BidOptions::new("pl1"),
                Arc::new(ConsentState::default()),
                move |_| sink.store(true, Ordering::SeqCst),
            )
            .expect("worker should spawn");

        transport.entered.wait();
        handle.abandon();
        assert!(handle.is_abandoned());
        transport.release.wait();
        assert!(handle.wait());

        assert_eq!(*transport.calls.lock(), 1);
        assert!(!delivered.load(Ordering::SeqCst));
        assert_eq!(
            client.breakers().get("pl1").snapshot().consecutive_failures,
            1
        );
    }

    #[test]
    fn stats_track_requests_and_attempts() {
        let (client, _transport, _clock) = client_with(vec![
            Err(timeout()),
            Ok(TransportResponse::new(200, winner_body("admob", 1.0))),
            Ok(TransportResponse::new(204, "")),
        ]);

        let _ = client.request_bid(&BidOptions::new("pl1"), &ConsentState::default());
        let _ = client.request_bid(&BidOptions::new("pl2"), &ConsentState::default());

        let snapshot = client.stats().snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(snapshot.winners, 1);
        assert_eq!(snapshot.failures.get("no_fill"), Some(&1));
    }
}
