//! Screener configuration module.
//!
//! Every field is defaulted, so an empty `screener` section (or none at
//! all) yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use zero_common::util::expand_path;
use zero_common::{Config, Error};

use crate::data::FetchPolicy;

/// Upper bound for cache TTLs (10 years).
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

// ============================================================================
// Main Screener Configuration
// ============================================================================

/// Configuration for one screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Maximum P/E ratio (valuation ceiling)
    #[serde(default = "default_max_pe")]
    pub max_pe: f64,

    /// Price must stay below `week_52_low * price_ratio`
    #[serde(default = "default_price_ratio")]
    pub price_ratio: f64,

    /// Lower bound of the averaged growth range (%, inclusive)
    #[serde(default = "default_growth_min")]
    pub growth_min: f64,

    /// Upper bound of the averaged growth range (%, inclusive)
    #[serde(default = "default_growth_max")]
    pub growth_max: f64,

    /// Concurrent report fetches in the expensive stage
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Number of ranked candidates to keep
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Category keywords matched against the instrument name
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,

    /// Whether keyword matching is case-sensitive
    #[serde(default = "default_true")]
    pub case_sensitive: bool,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            max_pe: default_max_pe(),
            price_ratio: default_price_ratio(),
            growth_min: default_growth_min(),
            growth_max: default_growth_max(),
            max_workers: default_max_workers(),
            top_n: default_top_n(),
            keywords: default_keywords(),
            case_sensitive: true,
            fetch: FetchConfig::default(),
            cache: CacheConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl ScreenerConfig {
    /// Decode the `screener` section of the service config.
    pub fn from_config(config: &Config) -> zero_common::Result<Self> {
        config.section("screener")
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> zero_common::Result<()> {
        fn invalid(msg: String) -> zero_common::Result<()> {
            Err(Error::Config(msg))
        }

        if !self.max_pe.is_finite() || self.max_pe <= 0.0 {
            return invalid(format!("max_pe must be positive, got {}", self.max_pe));
        }
        if !self.price_ratio.is_finite() || self.price_ratio <= 0.0 {
            return invalid(format!("price_ratio must be positive, got {}", self.price_ratio));
        }
        if !self.growth_min.is_finite() || !self.growth_max.is_finite() {
            return invalid("growth bounds must be finite".to_string());
        }
        if self.growth_min > self.growth_max {
            return invalid(format!(
                "growth_min ({}) is greater than growth_max ({})",
                self.growth_min, self.growth_max
            ));
        }
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1".to_string());
        }
        if self.top_n == 0 {
            return invalid("top_n must be at least 1".to_string());
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return invalid("keywords must contain at least one non-empty entry".to_string());
        }
        if self.fetch.chunk_size == 0 {
            return invalid("fetch.chunk_size must be at least 1".to_string());
        }
        if self.fetch.request_timeout_secs == 0 {
            return invalid("fetch.request_timeout_secs must be at least 1".to_string());
        }
        for (name, ttl) in [
            ("cache.quote_ttl_secs", self.cache.quote_ttl_secs),
            ("cache.report_ttl_secs", self.cache.report_ttl_secs),
        ] {
            if ttl > MAX_TTL_SECS {
                return invalid(format!("{name} exceeds {MAX_TTL_SECS} seconds"));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.request_timeout_secs)
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            chunk_size: self.fetch.chunk_size,
            chunk_delay: Duration::from_millis(self.fetch.chunk_delay_ms),
            request_timeout: self.request_timeout(),
            max_chunk_retries: self.fetch.max_chunk_retries,
        }
    }

    pub fn quote_ttl(&self) -> chrono::Duration {
        ttl(self.cache.quote_ttl_secs)
    }

    pub fn report_ttl(&self) -> chrono::Duration {
        ttl(self.cache.report_ttl_secs)
    }

    /// Cache root with `~` and environment variables expanded.
    pub fn cache_dir(&self) -> PathBuf {
        expand_path(&self.cache.dir)
    }

    pub fn report_dir(&self) -> PathBuf {
        expand_path(&self.output.report_dir)
    }

    /// Parameters that shape the result, for reports.
    pub fn params_summary(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("max_pe".to_string(), self.max_pe.to_string()),
            ("price_ratio".to_string(), self.price_ratio.to_string()),
            (
                "growth_range".to_string(),
                format!("{}%-{}%", self.growth_min, self.growth_max),
            ),
            ("max_workers".to_string(), self.max_workers.to_string()),
            ("top_n".to_string(), self.top_n.to_string()),
            ("keywords".to_string(), self.keywords.len().to_string()),
        ])
    }
}

fn ttl(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_TTL_SECS) as i64)
}

fn default_max_pe() -> f64 {
    100.0
}

fn default_price_ratio() -> f64 {
    2.0
}

fn default_growth_min() -> f64 {
    30.0
}

fn default_growth_max() -> f64 {
    100.0
}

fn default_max_workers() -> usize {
    10
}

fn default_top_n() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Technology and growth-sector keywords.
pub const TECH_KEYWORDS: &[&str] = &[
    "半导体", "芯片", "集成电路", "电子", "计算机", "软件", "互联网",
    "通信", "电信", "网络", "人工智能", "AI", "新能源", "光伏", "锂电",
    "新能源汽车", "电动车", "电池", "储能", "机器人", "自动化",
    "生物科技", "医药", "医疗器械", "创新药", "基因", "云计算", "大数据",
    "物联网", "5G", "区块链", "智能制造", "高端装备", "航空航天",
    "光学", "光电", "精密", "智能", "科技", "信息", "数字", "微", "芯",
    "锂", "钠", "硅", "碳", "纳", "量子",
];

fn default_keywords() -> Vec<String> {
    TECH_KEYWORDS.iter().map(|k| k.to_string()).collect()
}

// ============================================================================
// Fetch Configuration
// ============================================================================

/// Upstream request shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Identifiers per quote request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between quote requests (ms)
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,

    /// Deadline for a single upstream call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra attempts for a failed quote chunk
    #[serde(default = "default_max_chunk_retries")]
    pub max_chunk_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_chunk_retries: default_max_chunk_retries(),
        }
    }
}

fn default_chunk_size() -> usize {
    100
}

fn default_chunk_delay_ms() -> u64 {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_chunk_retries() -> u32 {
    1
}

// ============================================================================
// Cache Configuration
// ============================================================================

/// Cache location and freshness windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root directory
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Quote freshness (seconds)
    #[serde(default = "default_quote_ttl_secs")]
    pub quote_ttl_secs: u64,

    /// Annual report freshness (seconds)
    #[serde(default = "default_report_ttl_secs")]
    pub report_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            quote_ttl_secs: default_quote_ttl_secs(),
            report_ttl_secs: default_report_ttl_secs(),
        }
    }
}

fn default_cache_dir() -> String {
    "~/.codecoder/screener/cache".to_string()
}

fn default_quote_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_report_ttl_secs() -> u64 {
    7 * 24 * 3600 // annual data changes rarely
}

// ============================================================================
// Output Configuration
// ============================================================================

/// Output configuration for screener results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Whether to save local report files
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for local reports
    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    /// Report formats to generate
    #[serde(default = "default_report_formats")]
    pub formats: Vec<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_dir: default_report_dir(),
            formats: default_report_formats(),
        }
    }
}

fn default_report_dir() -> String {
    "~/.codecoder/reports/screener".to_string()
}

fn default_report_formats() -> Vec<String> {
    vec!["markdown".to_string(), "json".to_string()]
}

// ============================================================================
// Tests
// ============================================================================
