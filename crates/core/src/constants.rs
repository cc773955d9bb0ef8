use http::header::HeaderName;

pub const HEADER_X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Path appended to `auction.base_url`.
pub const AUCTION_PATH: &str = "/v1/auction";

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Name given to worker threads spawned by `request_bid_async`.
pub const WORKER_THREAD_NAME: &str = "apex-auction";

pub const DEFAULT_CURRENCY: &str = "USD";

pub const AUCTION_TYPE_HEADER_BIDDING: &str = "header_bidding";
