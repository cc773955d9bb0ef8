//! Auction client for the mediation service.
//!
//! [`AuctionClient`] sends one bid request per call to `POST /v1/auction`,
//! folds every result into a [`BidOutcome`], retries transient failures and
//! stores winners in the ad cache. The HTTP layer sits behind
//! [`AuctionTransport`] so it can be scripted in tests.

pub mod classify;
pub mod client;
pub mod retry;
pub mod transport;
pub mod types;

pub use client::{AuctionClient, BidHandle};
pub use retry::RetryPolicy;
pub use transport::{AuctionTransport, TransportRequest, TransportResponse, UreqTransport};
pub use types::{
    AdType, BidOptions, BidOutcome, BidRequest, DeviceInfo, Failure, FailureReason, UserInfo,
    Winner,
};
