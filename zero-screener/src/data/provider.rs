//! Provider abstractions for screening data.
//!
//! The pipeline depends only on [`QuoteProvider`] and [`ReportProvider`].
//! Upstream adapters implement the narrower [`QuoteSource`] and
//! [`ReportSource`] traits, which report failures as [`ProviderError`];
//! the cache-backed providers turn those failures into absence.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

use super::{FinancialReport, Quote, Universe};

// ============================================================================
// Provider Error
// ============================================================================

/// Errors raised by upstream sources.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Connection failed or the request could not be sent
    #[error("Network error: {0}")]
    Network(String),
    /// No response within the request deadline
    #[error("Request timed out: {0}")]
    Timeout(String),
    /// Upstream throttled the request
    #[error("Rate limited: {0}")]
    RateLimited(String),
    /// Response arrived but could not be parsed
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// Upstream reported a server-side failure
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Check if the error is recoverable (worth retrying)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited(_) | Self::Unavailable(_)
        )
    }

    /// Short label for logs and skip accounting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::RateLimited(_) => "rate_limited",
            Self::Malformed(_) => "malformed",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        if e.is_decode() {
            return Self::Malformed(e.to_string());
        }
        match e.status() {
            Some(status) if status.as_u16() == 429 => Self::RateLimited(e.to_string()),
            Some(status) if status.is_server_error() => Self::Unavailable(e.to_string()),
            _ => Self::Network(e.to_string()),
        }
    }
}

// ============================================================================
// Capability Traits (used by the pipeline)
// ============================================================================

/// Batch quote capability.
///
/// Identifiers with no data are simply missing from the returned map.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate codes this provider can quote.
    fn universe(&self) -> Universe;

    /// Map a bare code to the provider's namespaced identifier.
    fn normalize(&self, code: &str) -> String;

    /// Quotes for the given bare codes, keyed by bare code.
    async fn fetch_batch(&self, codes: &[String]) -> HashMap<String, Quote>;
}

/// Single-item annual report capability.
#[async_trait]
pub trait ReportProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Map a bare code to the provider's namespaced identifier.
    fn normalize(&self, code: &str) -> String;

    /// Report for a bare code, or `None` when no data is available.
    async fn fetch_one(&self, code: &str) -> Option<FinancialReport>;
}

// ============================================================================
// Upstream Traits (implemented by adapters)
// ============================================================================

/// Upstream endpoint serving quotes in bounded chunks.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn universe(&self) -> Universe {
        Universe::a_share()
    }

    fn normalize(&self, code: &str) -> String;

    /// One upstream call for a chunk of bare codes.
    async fn fetch_chunk(&self, codes: &[String]) -> Result<HashMap<String, Quote>, ProviderError>;
}

/// Upstream endpoint serving one report per call.
#[async_trait]
pub trait ReportSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn normalize(&self, code: &str) -> String;

    /// `Ok(None)` means upstream answered but has no report for the code.
    async fn fetch_report(&self, code: &str) -> Result<Option<FinancialReport>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_recoverable() {
        assert!(ProviderError::Network("reset".into()).is_recoverable());
        assert!(ProviderError::Timeout("30s".into()).is_recoverable());
        assert!(ProviderError::RateLimited("429".into()).is_recoverable());
        assert!(ProviderError::Unavailable("503".into()).is_recoverable());
        assert!(!ProviderError::Malformed("bad json".into()).is_recoverable());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Malformed("missing result".into());
        assert_eq!(err.to_string(), "Malformed response: missing result");
        assert_eq!(err.kind(), "malformed");
    }
}
