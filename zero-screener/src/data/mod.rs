//! Market data for A-share screening.
//!
//! Two provider variants share one capability contract:
//! - **Quotes** (batch): live price and valuation snapshot per instrument
//! - **Reports** (one at a time): the three most recent annual reports
//!
//! Both are served through the [`crate::cache::CacheStore`]; only the
//! identifiers the cache cannot answer go upstream.
//!
//! # Upstream Sources
//! - **Tencent** (`qt.gtimg.cn`): batched real-time quotes
//! - **Eastmoney** (`datacenter-web.eastmoney.com`): annual performance reports

mod eastmoney;
mod provider;
mod quotes;
mod reports;
mod tencent;
mod universe;

pub use eastmoney::{to_eastmoney_id, EastmoneyReportSource};
pub use provider::{ProviderError, QuoteProvider, QuoteSource, ReportProvider, ReportSource};
pub use quotes::{CachedQuoteProvider, FetchPolicy};
pub use reports::CachedReportProvider;
pub use tencent::{to_tencent_id, TencentQuoteSource};
pub use universe::Universe;

use serde::{Deserialize, Serialize};

/// Cache namespace for live quotes.
pub const QUOTE_NAMESPACE: &str = "quote";

/// Cache namespace for annual reports.
pub const REPORT_NAMESPACE: &str = "report";

/// Number of annual records a complete report carries.
pub const REPORT_YEARS: usize = 3;

// ============================================================================
// Quote
// ============================================================================

/// Live quote snapshot for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Bare instrument code (e.g. "600000")
    pub code: String,
    pub name: String,
    pub price: f64,
    /// Price/earnings ratio
    pub pe: f64,
    /// Price/book ratio
    pub pb: f64,
    /// Market capitalization (亿元)
    pub market_cap: f64,
    pub week_52_low: f64,
    pub week_52_high: f64,
}

impl Quote {
    /// A quote is usable (and cacheable) when it names the instrument and has a price.
    pub fn is_usable(&self) -> bool {
        !self.name.trim().is_empty() && self.price > 0.0
    }
}

// ============================================================================
// Financial Report
// ============================================================================

/// One annual report row. Growth figures are year-over-year percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnualRecord {
    pub year: i32,
    pub revenue: f64,
    pub profit: f64,
    pub revenue_growth: f64,
    pub profit_growth: f64,
}

/// The most recent annual records for an instrument, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialReport {
    pub code: String,
    pub records: Vec<AnnualRecord>,
}

impl FinancialReport {
    pub fn new(code: impl Into<String>, records: Vec<AnnualRecord>) -> Self {
        Self {
            code: code.into(),
            records,
        }
        .normalized()
    }

    /// Sort newest first, keep one record per year, keep at most [`REPORT_YEARS`].
    pub fn normalized(mut self) -> Self {
        self.records.sort_by(|a, b| b.year.cmp(&a.year));
        self.records.dedup_by_key(|r| r.year);
        self.records.truncate(REPORT_YEARS);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exactly [`REPORT_YEARS`] records in strictly descending year order.
    pub fn is_complete(&self) -> bool {
        self.records.len() == REPORT_YEARS
            && self.records.windows(2).all(|w| w[0].year > w[1].year)
    }

    pub fn revenue_growth(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.revenue_growth).collect()
    }

    pub fn profit_growth(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.profit_growth).collect()
    }

    /// Mean revenue growth across all records.
    pub fn avg_revenue_growth(&self) -> Option<f64> {
        mean(self.records.iter().map(|r| r.revenue_growth))
    }

    /// Mean profit growth across all records.
    pub fn avg_profit_growth(&self) -> Option<f64> {
        mean(self.records.iter().map(|r| r.profit_growth))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}
