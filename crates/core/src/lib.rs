//! Client-side mediation core for the Apex ad SDK.
//!
//! This crate holds the platform-independent parts of the SDK: consent
//! decoding, the single-endpoint auction client with its resilience layers,
//! the ready-ad cache and the C ABI used by the platform bindings.
//!
//! # Modules
//!
//! - [`auction`]: Bid requests, response classification and retry policy
//! - [`breaker`]: Per-placement circuit breakers
//! - [`cache`]: Ready-ad cache with expiry and single consumption
//! - [`clock`]: Wall, monotonic and sleep abstraction
//! - [`connectivity`]: Network state tracking and preflight checks
//! - [`consent`]: Consent snapshot and TCF v2 decoding
//! - [`constants`]: Header names, paths and other fixed values
//! - [`context`]: Top-level SDK handle tying the subsystems together
//! - [`error`]: Error types and the failure taxonomy mapping
//! - [`ffi`]: C ABI for platform bindings
//! - [`logging`]: Logger setup and key masking
//! - [`settings`]: Configuration loading and validation
//! - [`stats`]: In-memory auction counters
//! - [`test_support`]: Testing utilities and mocks
//! - [`threading`]: Main-thread affinity contract

pub mod auction;
pub mod breaker;
pub mod cache;
pub mod clock;
pub mod connectivity;
pub mod consent;
pub mod constants;
pub mod context;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod settings;
pub mod stats;
pub mod threading;

pub use context::MediationContext;
pub use error::MediationError;
pub use settings::Settings;
