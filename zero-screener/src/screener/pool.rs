//! Bounded-concurrency report fan-out for the expensive stage.
//!
//! One task per candidate is spawned on a [`JoinSet`]; a shared semaphore
//! caps how many report fetches are in flight. Results are drained in
//! completion order and re-associated with their candidate by code.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::engine::Candidate;
use crate::data::{FinancialReport, ReportProvider};

/// What a worker learned about one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Found(FinancialReport),
    /// Provider answered with no data
    Absent,
    /// Deadline elapsed before the provider answered
    TimedOut,
    /// Worker panicked or could not start
    Failed,
}

/// Fetch a report for every candidate with at most `max_workers` in flight.
///
/// Every input candidate appears exactly once in the output, in completion
/// order. Candidate codes are expected to be unique.
pub async fn fan_out_reports(
    provider: Arc<dyn ReportProvider>,
    candidates: Vec<Candidate>,
    max_workers: usize,
    timeout: Duration,
) -> Vec<(Candidate, ReportOutcome)> {
    let total = candidates.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut join_set = JoinSet::new();
    let mut pending: HashMap<String, Candidate> = HashMap::with_capacity(total);

    for candidate in candidates {
        let code = candidate.code.clone();
        let provider = Arc::clone(&provider);
        let semaphore = Arc::clone(&semaphore);

        join_set.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (code, ReportOutcome::Failed);
            };
            let outcome = match tokio::time::timeout(timeout, provider.fetch_one(&code)).await {
                Ok(Some(report)) => ReportOutcome::Found(report),
                Ok(None) => ReportOutcome::Absent,
                Err(_) => ReportOutcome::TimedOut,
            };
            (code, outcome)
        });

        pending.insert(candidate.code.clone(), candidate);
    }

    let mut results = Vec::with_capacity(total);
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((code, outcome)) => match pending.remove(&code) {
                Some(candidate) => results.push((candidate, outcome)),
                None => warn!(code = %code, "Report result for unknown candidate"),
            },
            Err(e) => warn!(error = %e, "Report worker failed"),
        }

        if results.len() % 50 == 0 && !results.is_empty() {
            debug!(done = results.len(), total, "Report fan-out progress");
        }
    }

    // Candidates whose worker panicked never reported back.
    results.extend(
        pending
            .into_values()
            .map(|candidate| (candidate, ReportOutcome::Failed)),
    );

    results
}

// ============================================================================
// Tests
// ============================================================================
