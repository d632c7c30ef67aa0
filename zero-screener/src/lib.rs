//! Zero Screener Library
//!
//! Multi-stage A-share screener that looks for technology-themed growth
//! stocks trading close to their 52-week low.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    zero-screener (Rust Service)                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  Cache Store    │  │  Market Data    │  │  Screener       │     │
//! │  │  (memory+disk)  │◀─│  Providers      │◀─│  Engine         │     │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Cheap vs. expensive filtering
//! - Quote predicates (P/E, category keyword, distance from 52-week low)
//!   run in memory over the whole universe
//! - Annual-report growth checks run only for the survivors, under a
//!   bounded worker pool
//!
//! ## Cache
//! - Quotes live for an hour, reports for a week
//! - Entries survive restarts through the on-disk tier

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cache;
pub mod data;
pub mod screener;

pub use cache::{CacheKey, CacheStats, CacheStore};
pub use data::{FinancialReport, Quote, QuoteProvider, ReportProvider, Universe};
pub use screener::{ScreenerConfig, ScreenerEngine, ScreenerError, ScreenerResult};
