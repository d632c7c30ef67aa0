//! Screening predicates.
//!
//! Two stages:
//! 1. **Cheap** (in-memory, per quote): validity → P/E ceiling → category
//!    keyword → price vs. 52-week low. Short-circuits on the first failure.
//! 2. **Expensive** (per annual report): complete 3-year report with
//!    averaged revenue and profit growth inside the configured range.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::ScreenerConfig;
use super::engine::Candidate;
use crate::data::{FinancialReport, Quote};

// ============================================================================
// Filter Stage
// ============================================================================

/// Filter stage identifier for tracking where candidates are eliminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterStage {
    /// Quote-only predicates
    Cheap,
    /// Report-backed growth predicate
    Expensive,
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cheap => write!(f, "行情筛选"),
            Self::Expensive => write!(f, "财务筛选"),
        }
    }
}

// ============================================================================
// Skip Reason
// ============================================================================

/// Why a candidate left the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Price, P/E or 52-week low missing or non-positive
    InvalidData,
    /// P/E above the ceiling
    PeTooHigh,
    /// Name matches no category keyword
    CategoryMismatch,
    /// Price not below `week_52_low * price_ratio`
    PriceTooHigh,
    /// Report provider had no data
    NoReport,
    /// Fewer than three annual records
    IncompleteReport,
    /// Average revenue growth outside the range
    RevenueGrowthOutOfRange,
    /// Average profit growth outside the range
    ProfitGrowthOutOfRange,
    /// Report fetch exceeded its deadline
    Timeout,
    /// Report worker failed unexpectedly
    WorkerFailed,
}

impl SkipReason {
    pub fn stage(&self) -> FilterStage {
        match self {
            Self::InvalidData | Self::PeTooHigh | Self::CategoryMismatch | Self::PriceTooHigh => {
                FilterStage::Cheap
            }
            _ => FilterStage::Expensive,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::InvalidData => "数据无效",
            Self::PeTooHigh => "市盈率过高",
            Self::CategoryMismatch => "非目标行业",
            Self::PriceTooHigh => "股价偏离低点",
            Self::NoReport => "无财务数据",
            Self::IncompleteReport => "年报不足3年",
            Self::RevenueGrowthOutOfRange => "营收增长不在范围内",
            Self::ProfitGrowthOutOfRange => "净利增长不在范围内",
            Self::Timeout => "请求超时",
            Self::WorkerFailed => "任务失败",
        };
        f.write_str(label)
    }
}

// ============================================================================
// Cheap Filter
// ============================================================================

/// Quote-only predicates, applied before any report is fetched.
#[derive(Debug, Clone)]
pub struct CheapFilter {
    max_pe: f64,
    price_ratio: f64,
    keywords: Vec<String>,
    case_sensitive: bool,
}

impl CheapFilter {
    pub fn new(config: &ScreenerConfig) -> Self {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                if config.case_sensitive {
                    k.to_string()
                } else {
                    k.to_lowercase()
                }
            })
            .collect();

        Self {
            max_pe: config.max_pe,
            price_ratio: config.price_ratio,
            keywords,
            case_sensitive: config.case_sensitive,
        }
    }

    /// First keyword found as a substring of `text`.
    pub fn matched_keyword(&self, text: &str) -> Option<&str> {
        let haystack = if self.case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        };
        self.keywords
            .iter()
            .find(|k| haystack.contains(k.as_str()))
            .map(String::as_str)
    }

    /// Evaluate all four predicates in order.
    pub fn evaluate(&self, quote: &Quote) -> Result<Candidate, SkipReason> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(quote.price) || !positive(quote.pe) || !positive(quote.week_52_low) {
            return Err(SkipReason::InvalidData);
        }

        if quote.pe > self.max_pe {
            return Err(SkipReason::PeTooHigh);
        }

        let category = self
            .matched_keyword(&quote.name)
            .ok_or(SkipReason::CategoryMismatch)?
            .to_string();

        if quote.price >= quote.week_52_low * self.price_ratio {
            return Err(SkipReason::PriceTooHigh);
        }

        Ok(Candidate::from_quote(quote, category))
    }
}

// ============================================================================
// Growth Filter
// ============================================================================

/// Growth figures that passed the expensive stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthSummary {
    pub revenue_growth: Vec<f64>,
    pub profit_growth: Vec<f64>,
    pub avg_revenue_growth: f64,
    pub avg_profit_growth: f64,
}

/// Averaged 3-year growth predicate.
#[derive(Debug, Clone, Copy)]
pub struct GrowthFilter {
    min: f64,
    max: f64,
}

impl GrowthFilter {
    pub fn new(config: &ScreenerConfig) -> Self {
        Self {
            min: config.growth_min,
            max: config.growth_max,
        }
    }

    fn in_range(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    pub fn evaluate(&self, report: &FinancialReport) -> Result<GrowthSummary, SkipReason> {
        if !report.is_complete() {
            return Err(SkipReason::IncompleteReport);
        }

        let avg_revenue_growth = report
            .avg_revenue_growth()
            .ok_or(SkipReason::IncompleteReport)?;
        if !self.in_range(avg_revenue_growth) {
            return Err(SkipReason::RevenueGrowthOutOfRange);
        }

        let avg_profit_growth = report
            .avg_profit_growth()
            .ok_or(SkipReason::IncompleteReport)?;
        if !self.in_range(avg_profit_growth) {
            return Err(SkipReason::ProfitGrowthOutOfRange);
        }

        Ok(GrowthSummary {
            revenue_growth: report.revenue_growth(),
            profit_growth: report.profit_growth(),
            avg_revenue_growth,
            avg_profit_growth,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AnnualRecord;

    fn quote(name: &str, price: f64, pe: f64, low: f64) -> Quote {
        Quote {
            code: "300001".into(),
            name: name.into(),
            price,
            pe,
            pb: 2.0,
            market_cap: 100.0,
            week_52_low: low,
            week_52_high: low * 3.0,
        }
    }

    fn report(growth: [(f64, f64); 3]) -> FinancialReport {
        let records = growth
            .iter()
            .enumerate()
            .map(|(i, (rev, profit))| AnnualRecord {
                year: 2023 - i as i32,
                revenue: 1.0e9,
                profit: 1.0e8,
                revenue_growth: *rev,
                profit_growth: *profit,
            })
            .collect();
        FinancialReport::new("300001", records)
    }

    #[test]
    fn test_cheap_filter_passes() {
        let filter = CheapFilter::new(&ScreenerConfig::default());
        let candidate = filter.evaluate(&quote("某某科技", 10.0, 15.0, 6.0)).unwrap();
        assert_eq!(candidate.category, "科技");
        assert_eq!(candidate.pe, 15.0);
    }

    #[test]
    fn test_cheap_filter_order() {
        let filter = CheapFilter::new(&ScreenerConfig::default());

        // Invalid data wins over every later predicate
        assert_eq!(
            filter.evaluate(&quote("银行", 0.0, 500.0, 6.0)).unwrap_err(),
            SkipReason::InvalidData
        );
        assert_eq!(
            filter.evaluate(&quote("某某科技", 10.0, -3.0, 6.0)).unwrap_err(),
            SkipReason::InvalidData
        );
        assert_eq!(
            filter.evaluate(&quote("某某科技", 10.0, 15.0, 0.0)).unwrap_err(),
            SkipReason::InvalidData
        );
        // P/E ceiling before category
        assert_eq!(
            filter.evaluate(&quote("银行", 100.0, 150.0, 6.0)).unwrap_err(),
            SkipReason::PeTooHigh
        );
        // Category before price ratio
        assert_eq!(
            filter.evaluate(&quote("银行", 100.0, 15.0, 6.0)).unwrap_err(),
            SkipReason::CategoryMismatch
        );
        assert_eq!(
            filter.evaluate(&quote("某某科技", 10.0, 15.0, 4.0)).unwrap_err(),
            SkipReason::PriceTooHigh
        );
    }

    #[test]
    fn test_pe_ceiling_inclusive() {
        let filter = CheapFilter::new(&ScreenerConfig::default());
        assert!(filter.evaluate(&quote("某某科技", 10.0, 100.0, 6.0)).is_ok());
    }

    #[test]
    fn test_keyword_case_sensitivity() {
        let config = ScreenerConfig {
            keywords: vec!["AI".into()],
            ..Default::default()
        };
        let sensitive = CheapFilter::new(&config);
        assert_eq!(sensitive.matched_keyword("OpenAI集团"), Some("AI"));
        assert_eq!(sensitive.matched_keyword("openai集团"), None);

        let insensitive = CheapFilter::new(&ScreenerConfig {
            case_sensitive: false,
            ..config
        });
        assert_eq!(insensitive.matched_keyword("openai集团"), Some("ai"));
    }

    #[test]
    fn test_growth_filter_average() {
        let filter = GrowthFilter::new(&ScreenerConfig::default());

        // Single years outside the range are fine as long as the average is inside
        let summary = filter
            .evaluate(&report([(10.0, 40.0), (50.0, 40.0), (60.0, 40.0)]))
            .unwrap();
        assert_eq!(summary.avg_revenue_growth, 40.0);
        assert_eq!(summary.revenue_growth, vec![10.0, 50.0, 60.0]);
    }

    #[test]
    fn test_growth_filter_bounds_inclusive() {
        let filter = GrowthFilter::new(&ScreenerConfig::default());
        assert!(filter
            .evaluate(&report([(30.0, 100.0), (30.0, 100.0), (30.0, 100.0)]))
            .is_ok());
    }

    #[test]
    fn test_growth_filter_rejections() {
        let filter = GrowthFilter::new(&ScreenerConfig::default());

        assert_eq!(
            filter
                .evaluate(&report([(10.0, 40.0), (10.0, 40.0), (10.0, 40.0)]))
                .unwrap_err(),
            SkipReason::RevenueGrowthOutOfRange
        );
        assert_eq!(
            filter
                .evaluate(&report([(40.0, 150.0), (40.0, 150.0), (40.0, 150.0)]))
                .unwrap_err(),
            SkipReason::ProfitGrowthOutOfRange
        );

        let short = FinancialReport::new("300001", report([(40.0, 40.0); 3]).records[..2].to_vec());
        assert_eq!(filter.evaluate(&short).unwrap_err(), SkipReason::IncompleteReport);
    }

    #[test]
    fn test_skip_reason_stage() {
        assert_eq!(SkipReason::PriceTooHigh.stage(), FilterStage::Cheap);
        assert_eq!(SkipReason::NoReport.stage(), FilterStage::Expensive);
        assert_eq!(SkipReason::Timeout.stage(), FilterStage::Expensive);
    }
}
