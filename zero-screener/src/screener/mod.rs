//! Full Market Screener Module.
//!
//! Scans the whole A-share universe for cheap technology growth stocks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     科技成长股筛选流程                                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐           │
//! │  │  Universe   │────▶│ QuoteProvider│───▶│ CheapFilter │           │
//! │  │ (沪深代码)  │     │ (批量行情)  │     │ PE/行业/低点│           │
//! │  └─────────────┘     └─────────────┘     └──────┬──────┘           │
//! │                                                 │                   │
//! │  ┌─────────────┐     ┌─────────────┐     ┌──────▼──────┐           │
//! │  │   Report    │◀────│    rank     │◀────│ GrowthFilter│           │
//! │  │ (md / json) │     │ (PE 升序)   │     │ (限流并发)  │           │
//! │  └─────────────┘     └─────────────┘     └─────────────┘           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use zero_screener::screener::{ScreenerConfig, ScreenerEngine};
//!
//! let engine = ScreenerEngine::new(ScreenerConfig::default(), quotes, reports);
//! let result = engine.run().await?;
//! println!("{}", result.summary());
//! ```

pub mod config;
pub mod engine;
pub mod filter;
pub mod pool;
pub mod report;

pub use config::{CacheConfig, FetchConfig, OutputConfig, ScreenerConfig, TECH_KEYWORDS};
pub use engine::{
    rank, Candidate, RunStage, ScreenerEngine, ScreenerError, ScreenerResult, StageTiming, Stats,
};
pub use filter::{CheapFilter, FilterStage, GrowthFilter, GrowthSummary, SkipReason};
pub use pool::{fan_out_reports, ReportOutcome};
pub use report::{FileReportEmitter, ReportEmitter, ReportFormat, ScreenerReport};
