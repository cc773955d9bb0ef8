//! HTTP transport for the auction endpoint.

use std::io;
use std::time::Duration;

use error_stack::Report;
use http::header::{CONTENT_TYPE, RETRY_AFTER, USER_AGENT};

use crate::constants::{CONTENT_TYPE_JSON, HEADER_X_API_KEY};
use crate::error::MediationError;

/// One POST to the auction endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub api_key: String,
    pub user_agent: String,
    pub body: Vec<u8>,
    /// Deadline for this call only.
    pub timeout: Duration,
}

/// Status, `Retry-After` and body of any completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<String>,
    pub body: String,
}

impl TransportResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// Issues auction calls. Every HTTP status is a successful exchange; only
/// failures below HTTP surface as errors, with a `Timeout` or `Network`
/// context when they can be told apart.
pub trait AuctionTransport: Send + Sync {
    /// Perform the call.
    ///
    /// # Errors
    ///
    /// Returns a `Timeout`, `Network` or `Transport` error when no HTTP
    /// response could be read.
    fn post(&self, request: &TransportRequest) -> Result<TransportResponse, Report<MediationError>>;
}

/// Blocking transport on a shared `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    #[must_use]
    pub fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AuctionTransport for UreqTransport {
    fn post(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, Report<MediationError>> {
        let response = self
            .agent
            .post(&request.url)
            .config()
            .timeout_global(Some(request.timeout))
            .http_status_as_error(false)
            .build()
            .header(CONTENT_TYPE.as_str(), CONTENT_TYPE_JSON)
            .header(HEADER_X_API_KEY.as_str(), request.api_key.as_str())
            .header(USER_AGENT.as_str(), request.user_agent.as_str())
            .send(request.body.as_slice())
            .map_err(classify_ureq_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .into_body()
            .read_to_string()
            .map_err(classify_ureq_error)?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify_ureq_error(err: ureq::Error) -> Report<MediationError> {
    let message = err.to_string();
    let context = match &err {
        ureq::Error::Timeout(_) => MediationError::Timeout { message },
        ureq::Error::Io(io_err) if io_err.kind() == io::ErrorKind::TimedOut => {
            MediationError::Timeout { message }
        }
        ureq::Error::Io(_) | ureq::Error::ConnectionFailed | ureq::Error::HostNotFound => {
            MediationError::Network { message }
        }
        _ => MediationError::Transport { message },
    };
    Report::new(err).change_context(context)
}
