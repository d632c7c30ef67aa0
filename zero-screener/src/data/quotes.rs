//! Cache-backed batch quote provider.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::provider::{ProviderError, QuoteProvider, QuoteSource};
use super::{Quote, Universe, QUOTE_NAMESPACE};
use crate::cache::{CacheKey, CacheStore};

/// How upstream chunk calls are issued.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Identifiers per upstream call
    pub chunk_size: usize,
    /// Fixed pause between successive upstream calls
    pub chunk_delay: Duration,
    /// Deadline for a single upstream call
    pub request_timeout: Duration,
    /// Extra attempts for a chunk after a recoverable failure
    pub max_chunk_retries: u32,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            chunk_delay: Duration::from_millis(200),
            request_timeout: Duration::from_secs(30),
            max_chunk_retries: 1,
        }
    }
}

/// Quote provider that answers from the cache and fetches the rest in chunks.
pub struct CachedQuoteProvider<S> {
    source: S,
    cache: Arc<CacheStore>,
    policy: FetchPolicy,
    ttl: chrono::Duration,
}

impl<S: QuoteSource> CachedQuoteProvider<S> {
    pub fn new(source: S, cache: Arc<CacheStore>, policy: FetchPolicy, ttl: chrono::Duration) -> Self {
        Self {
            source,
            cache,
            policy,
            ttl,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn cache_key(&self, code: &str) -> CacheKey {
        CacheKey::new(QUOTE_NAMESPACE, self.source.normalize(code))
    }

    /// One chunk, with a deadline per attempt and bounded retries.
    async fn fetch_chunk(&self, chunk: &[String]) -> Result<HashMap<String, Quote>, ProviderError> {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(
                self.policy.request_timeout,
                self.source.fetch_chunk(chunk),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no response within {:?}",
                    self.policy.request_timeout
                ))),
            };

            match result {
                Ok(quotes) => return Ok(quotes),
                Err(e) if e.is_recoverable() && attempt < self.policy.max_chunk_retries => {
                    attempt += 1;
                    debug!(
                        source = self.source.name(),
                        attempt,
                        error = %e,
                        "Retrying quote chunk"
                    );
                    tokio::time::sleep(self.policy.chunk_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: QuoteSource> QuoteProvider for CachedQuoteProvider<S> {
    fn name(&self) -> &'static str {
        self.source.name()
    }

    fn universe(&self) -> Universe {
        self.source.universe()
    }

    fn normalize(&self, code: &str) -> String {
        self.source.normalize(code)
    }

    async fn fetch_batch(&self, codes: &[String]) -> HashMap<String, Quote> {
        let mut quotes = HashMap::with_capacity(codes.len());
        let mut missing = Vec::new();

        for code in codes {
            match self.cache.get_as::<Quote>(&self.cache_key(code)) {
                Some(quote) => {
                    quotes.insert(code.clone(), quote);
                }
                None => missing.push(code.clone()),
            }
        }

        info!(
            source = self.source.name(),
            requested = codes.len(),
            cached = quotes.len(),
            missing = missing.len(),
            "Quote cache lookup complete"
        );

        let chunk_size = self.policy.chunk_size.max(1);
        let total_chunks = missing.len().div_ceil(chunk_size);
        let mut failed_chunks = 0;

        for (i, chunk) in missing.chunks(chunk_size).enumerate() {
            if i > 0 && !self.policy.chunk_delay.is_zero() {
                tokio::time::sleep(self.policy.chunk_delay).await;
            }

            let fetched = match self.fetch_chunk(chunk).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    failed_chunks += 1;
                    warn!(
                        source = self.source.name(),
                        chunk = i,
                        size = chunk.len(),
                        reason = e.kind(),
                        error = %e,
                        "Quote chunk failed, treating as no data"
                    );
                    continue;
                }
            };

            let requested: HashSet<&String> = chunk.iter().collect();
            for (code, quote) in fetched {
                if !requested.contains(&code) || !quote.is_usable() {
                    continue;
                }
                if let Err(e) = self.cache.set_as(&self.cache_key(&code), &quote, self.ttl) {
                    warn!(code = %code, error = %e, "Failed to cache quote");
                }
                quotes.insert(code, quote);
            }

            if (i + 1) % 10 == 0 {
                debug!(done = i + 1, total = total_chunks, "Quote chunks progress");
            }
        }

        info!(
            source = self.source.name(),
            quotes = quotes.len(),
            chunks = total_chunks,
            failed_chunks,
            "Quote batch complete"
        );

        quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn quote(code: &str, price: f64) -> Quote {
        Quote {
            code: code.to_string(),
            name: format!("{code}科技"),
            price,
            pe: 20.0,
            pb: 2.0,
            market_cap: 100.0,
            week_52_low: 8.0,
            week_52_high: 20.0,
        }
    }

    /// Records every chunk and fails the first `fail_first` calls.
    struct ScriptedSource {
        chunks: Mutex<Vec<Vec<String>>>,
        calls: AtomicU32,
        fail_first: u32,
        error: ProviderError,
    }

    impl ScriptedSource {
        fn new(fail_first: u32, error: ProviderError) -> Self {
            Self {
                chunks: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
                fail_first,
                error,
            }
        }
    }

    #[async_trait]
    impl QuoteSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn normalize(&self, code: &str) -> String {
            format!("x{code}")
        }

        async fn fetch_chunk(
            &self,
            codes: &[String],
        ) -> Result<HashMap<String, Quote>, ProviderError> {
            self.chunks.lock().unwrap().push(codes.to_vec());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(self.error.clone());
            }
            Ok(codes
                .iter()
                .map(|c| {
                    let price = if c.ends_with('0') { 0.0 } else { 10.0 };
                    (c.clone(), quote(c, price))
                })
                .collect())
        }
    }

    fn policy(chunk_size: usize, retries: u32) -> FetchPolicy {
        FetchPolicy {
            chunk_size,
            chunk_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            max_chunk_retries: retries,
        }
    }

    fn codes(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{i:06}")).collect()
    }

    #[tokio::test]
    async fn test_chunks_and_caches_valid_quotes() {
        let cache = Arc::new(CacheStore::in_memory());
        let provider = CachedQuoteProvider::new(
            ScriptedSource::new(0, ProviderError::Network("x".into())),
            cache.clone(),
            policy(4, 0),
            chrono::Duration::hours(1),
        );

        let result = provider.fetch_batch(&codes(10)).await;

        // "000010" has a zero price and is dropped
        assert_eq!(result.len(), 9);
        assert!(!result.contains_key("000010"));

        let sizes: Vec<usize> = provider.source().chunks.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        assert!(cache.get(&CacheKey::new(QUOTE_NAMESPACE, "x000001")).is_some());
        assert!(cache.get(&CacheKey::new(QUOTE_NAMESPACE, "x000010")).is_none());
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let cache = Arc::new(CacheStore::in_memory());
        let provider = CachedQuoteProvider::new(
            ScriptedSource::new(0, ProviderError::Network("x".into())),
            cache,
            policy(100, 0),
            chrono::Duration::hours(1),
        );

        provider.fetch_batch(&codes(3)).await;
        let again = provider.fetch_batch(&codes(3)).await;

        assert_eq!(again.len(), 3);
        assert_eq!(provider.source().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recoverable_failure_retried_once() {
        let provider = CachedQuoteProvider::new(
            ScriptedSource::new(1, ProviderError::Network("reset".into())),
            Arc::new(CacheStore::in_memory()),
            policy(100, 1),
            chrono::Duration::hours(1),
        );

        let result = provider.fetch_batch(&codes(3)).await;
        assert_eq!(result.len(), 3);
        assert_eq!(provider.source().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_chunk_degrades_to_absence() {
        let provider = CachedQuoteProvider::new(
            ScriptedSource::new(1, ProviderError::Malformed("garbled".into())),
            Arc::new(CacheStore::in_memory()),
            policy(2, 3),
            chrono::Duration::hours(1),
        );

        let result = provider.fetch_batch(&codes(4)).await;

        // First chunk is not retried (malformed), second succeeds
        assert_eq!(provider.source().calls.load(Ordering::SeqCst), 2);
        assert!(!result.contains_key("000001"));
        assert!(!result.contains_key("000002"));
        assert!(result.contains_key("000003"));
        assert!(result.contains_key("000004"));
    }
}
