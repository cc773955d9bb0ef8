//! Maps raw transport results onto [`BidOutcome`]s.

use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::Report;

use super::transport::TransportResponse;
use super::types::{AuctionResponse, BidOutcome, FailureReason, WireWinner, Winner};
use crate::constants::DEFAULT_CURRENCY;
use crate::error::{IntoFailureReason, MediationError};

/// A classified attempt plus any server-requested delay before the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub outcome: BidOutcome,
    pub retry_after: Option<Duration>,
}

impl Classified {
    fn new(outcome: BidOutcome) -> Self {
        Self {
            outcome,
            retry_after: None,
        }
    }
}

/// Classify a completed HTTP exchange.
#[must_use]
pub fn classify_response(response: &TransportResponse, now: DateTime<Utc>) -> Classified {
    match response.status {
        200 => Classified::new(classify_body(&response.body)),
        204 => Classified::new(BidOutcome::failure(FailureReason::NoFill)),
        429 => Classified {
            outcome: BidOutcome::failure(FailureReason::RateLimited),
            retry_after: response
                .retry_after
                .as_deref()
                .and_then(|value| parse_retry_after(value, now)),
        },
        status => Classified::new(BidOutcome::failure_with_detail(
            FailureReason::from_status(status),
            format!("auction returned HTTP {status}"),
        )),
    }
}

/// Classify a failure below the HTTP layer.
#[must_use]
pub fn classify_error(report: &Report<MediationError>) -> Classified {
    let context = report.current_context();
    Classified::new(BidOutcome::failure_with_detail(
        context.failure_reason(),
        context.to_string(),
    ))
}

/// `Retry-After` as delta-seconds or an HTTP-date. Dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = at.with_timezone(&Utc).signed_duration_since(now);
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn classify_body(body: &str) -> BidOutcome {
    let response: AuctionResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(err) => {
            return BidOutcome::failure_with_detail(
                FailureReason::Error,
                format!("invalid auction response: {err}"),
            );
        }
    };
    let Some(raw) = response.winner else {
        return BidOutcome::failure_with_detail(FailureReason::NoFill, "response has no winner");
    };
    let wire: WireWinner = match serde_json::from_value(raw.clone()) {
        Ok(wire) => wire,
        Err(err) => {
            return BidOutcome::failure_with_detail(
                FailureReason::NoFill,
                format!("malformed winner: {err}"),
            );
        }
    };

    let Some(adapter) = wire.adapter.filter(|adapter| !adapter.trim().is_empty()) else {
        return BidOutcome::failure_with_detail(FailureReason::NoFill, "winner missing adapter");
    };
    let Some(cpm) = wire.cpm.filter(|cpm| cpm.is_finite() && *cpm >= 0.0) else {
        return BidOutcome::failure_with_detail(FailureReason::NoFill, "winner missing cpm");
    };

    #[allow(clippy::cast_possible_truncation)]
    let ecpm_micros = (cpm * 1_000_000.0).round() as i64;
    let ttl_ms = wire
        .ttl_seconds
        .or(response.ttl_seconds)
        .map(|seconds| seconds.saturating_mul(1000));

    BidOutcome::Winner(Winner {
        adapter,
        ecpm_micros,
        currency: wire
            .currency
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        creative_id: wire.creative_id,
        ad_markup: wire.ad_markup,
        bid_id: wire.bid_id,
        ttl_ms,
        raw,
    })
}
