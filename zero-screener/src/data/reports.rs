//! Cache-backed single-item report provider.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::{ReportProvider, ReportSource};
use super::{FinancialReport, REPORT_NAMESPACE};
use crate::cache::{CacheKey, CacheStore};

/// Report provider that answers from the cache and fetches one report per miss.
pub struct CachedReportProvider<S> {
    source: S,
    cache: Arc<CacheStore>,
    request_timeout: Duration,
    ttl: chrono::Duration,
}

impl<S: ReportSource> CachedReportProvider<S> {
    pub fn new(
        source: S,
        cache: Arc<CacheStore>,
        request_timeout: Duration,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            source,
            cache,
            request_timeout,
            ttl,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn cache_key(&self, code: &str) -> CacheKey {
        CacheKey::new(REPORT_NAMESPACE, self.source.normalize(code))
    }
}

#[async_trait]
impl<S: ReportSource> ReportProvider for CachedReportProvider<S> {
    fn name(&self) -> &'static str {
        self.source.name()
    }

    fn normalize(&self, code: &str) -> String {
        self.source.normalize(code)
    }

    async fn fetch_one(&self, code: &str) -> Option<FinancialReport> {
        let key = self.cache_key(code);
        if let Some(report) = self.cache.get_as::<FinancialReport>(&key) {
            return Some(report);
        }

        let fetched =
            match tokio::time::timeout(self.request_timeout, self.source.fetch_report(code)).await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    warn!(code, reason = e.kind(), error = %e, "Report fetch failed");
                    return None;
                }
                Err(_) => {
                    warn!(code, timeout = ?self.request_timeout, "Report fetch timed out");
                    return None;
                }
            };

        let Some(report) = fetched.map(FinancialReport::normalized) else {
            debug!(code, "No report available");
            return None;
        };
        if report.is_empty() {
            debug!(code, "Report has no annual records");
            return None;
        }

        if let Err(e) = self.cache.set_as(&key, &report, self.ttl) {
            warn!(code, error = %e, "Failed to cache report");
        }
        Some(report)
    }
}
