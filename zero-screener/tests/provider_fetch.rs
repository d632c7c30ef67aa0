//! Integration tests for the cache-backed providers.
//!
//! Covers request pacing, per-call deadlines and cache reuse across store
//! instances, using scripted upstream sources.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use zero_screener::cache::CacheStore;
use zero_screener::data::{
    AnnualRecord, CachedQuoteProvider, CachedReportProvider, FetchPolicy, FinancialReport,
    ProviderError, Quote, QuoteProvider, QuoteSource, ReportProvider, ReportSource,
};

// ============================================================================
// Scripted Sources
// ============================================================================

/// Quote source that stamps each call and optionally stalls on chosen calls.
struct PacedSource {
    call_times: Mutex<Vec<Instant>>,
    stall_calls: Vec<u32>,
    calls: AtomicU32,
}

impl PacedSource {
    fn new(stall_calls: Vec<u32>) -> Self {
        Self {
            call_times: Mutex::new(Vec::new()),
            stall_calls,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl QuoteSource for PacedSource {
    fn name(&self) -> &'static str {
        "paced"
    }

    fn normalize(&self, code: &str) -> String {
        format!("p{code}")
    }

    async fn fetch_chunk(&self, codes: &[String]) -> Result<HashMap<String, Quote>, ProviderError> {
        self.call_times.lock().unwrap().push(Instant::now());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall_calls.contains(&n) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(codes
            .iter()
            .map(|code| {
                (
                    code.clone(),
                    Quote {
                        code: code.clone(),
                        name: "测试科技".into(),
                        price: 10.0,
                        pe: 20.0,
                        pb: 2.0,
                        market_cap: 80.0,
                        week_52_low: 8.0,
                        week_52_high: 16.0,
                    },
                )
            })
            .collect())
    }
}

/// Report source returning a fixed number of annual records.
struct FixedReports {
    years: usize,
    calls: AtomicU32,
}

#[async_trait]
impl ReportSource for FixedReports {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn normalize(&self, code: &str) -> String {
        format!("R{code}")
    }

    async fn fetch_report(&self, code: &str) -> Result<Option<FinancialReport>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records: Vec<AnnualRecord> = (0..self.years as i32)
            .map(|i| AnnualRecord {
                year: 2023 - i,
                revenue: 1.0e9,
                profit: 1.0e8,
                revenue_growth: 35.0,
                profit_growth: 45.0,
            })
            .collect();
        Ok(Some(FinancialReport::new(code, records)))
    }
}

fn codes(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("300{i:03}")).collect()
}

fn policy(chunk_size: usize, delay_ms: u64, timeout_ms: u64, retries: u32) -> FetchPolicy {
    FetchPolicy {
        chunk_size,
        chunk_delay: Duration::from_millis(delay_ms),
        request_timeout: Duration::from_millis(timeout_ms),
        max_chunk_retries: retries,
    }
}

// ============================================================================
// Quote Provider
// ============================================================================

#[tokio::test]
async fn test_chunks_are_paced() {
    let provider = CachedQuoteProvider::new(
        PacedSource::new(Vec::new()),
        Arc::new(CacheStore::in_memory()),
        policy(2, 50, 1_000, 0),
        chrono::Duration::hours(1),
    );

    let quotes = provider.fetch_batch(&codes(6)).await;
    assert_eq!(quotes.len(), 6);

    let times = provider.source().call_times.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(50));
    }
}

#[tokio::test]
async fn test_stalled_chunk_times_out_as_absence() {
    let provider = CachedQuoteProvider::new(
        PacedSource::new(vec![1]),
        Arc::new(CacheStore::in_memory()),
        policy(2, 0, 100, 0),
        chrono::Duration::hours(1),
    );

    let quotes = provider.fetch_batch(&codes(6)).await;

    // The second chunk stalls past its deadline and contributes nothing
    assert_eq!(quotes.len(), 4);
    assert!(!quotes.contains_key("300003"));
    assert!(!quotes.contains_key("300004"));
}

#[tokio::test]
async fn test_timed_out_chunk_is_retried() {
    let provider = CachedQuoteProvider::new(
        PacedSource::new(vec![0]),
        Arc::new(CacheStore::in_memory()),
        policy(10, 0, 100, 1),
        chrono::Duration::hours(1),
    );

    let quotes = provider.fetch_batch(&codes(3)).await;
    assert_eq!(quotes.len(), 3);
    assert_eq!(provider.source().calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_quotes_reused_across_store_instances() {
    let dir = TempDir::new().unwrap();

    let first = CachedQuoteProvider::new(
        PacedSource::new(Vec::new()),
        Arc::new(CacheStore::open(dir.path()).unwrap()),
        policy(100, 0, 1_000, 0),
        chrono::Duration::hours(1),
    );
    let fetched = tokio_test::block_on(first.fetch_batch(&codes(3)));
    assert_eq!(fetched.len(), 3);

    let second = CachedQuoteProvider::new(
        PacedSource::new(Vec::new()),
        Arc::new(CacheStore::open(dir.path()).unwrap()),
        policy(100, 0, 1_000, 0),
        chrono::Duration::hours(1),
    );
    let cached = tokio_test::block_on(second.fetch_batch(&codes(3)));

    assert_eq!(cached, fetched);
    assert_eq!(second.source().calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Report Provider
// ============================================================================

#[tokio::test]
async fn test_report_cached_under_normalized_id() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(CacheStore::open(dir.path()).unwrap());
    let provider = CachedReportProvider::new(
        FixedReports {
            years: 5,
            calls: AtomicU32::new(0),
        },
        cache,
        Duration::from_secs(1),
        chrono::Duration::days(7),
    );

    let report = provider.fetch_one("300750").await.unwrap();
    assert_eq!(report.records.len(), 3);
    assert!(report.is_complete());

    let again = provider.fetch_one("300750").await.unwrap();
    assert_eq!(again, report);
    assert_eq!(provider.source().calls.load(Ordering::SeqCst), 1);

    assert!(dir.path().join("report").join("750").join("R300750.json").is_file());
}

#[tokio::test]
async fn test_empty_report_not_cached() {
    let provider = CachedReportProvider::new(
        FixedReports {
            years: 0,
            calls: AtomicU32::new(0),
        },
        Arc::new(CacheStore::in_memory()),
        Duration::from_secs(1),
        chrono::Duration::days(7),
    );

    assert!(provider.fetch_one("300750").await.is_none());
    assert!(provider.fetch_one("300750").await.is_none());
    assert_eq!(provider.source().calls.load(Ordering::SeqCst), 2);
}
