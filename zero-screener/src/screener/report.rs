//! Report generation module for screener results.
//!
//! Generates reports in two formats:
//! - Markdown (for reading)
//! - JSON (for programmatic use)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::config::ScreenerConfig;
use super::engine::ScreenerResult;
use super::filter::FilterStage;

// ============================================================================
// Report Format
// ============================================================================

/// Supported report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Markdown format (human-readable)
    Markdown,
    /// JSON format (machine-readable)
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Markdown => write!(f, "markdown"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

// ============================================================================
// Screener Report
// ============================================================================

/// Renders one screener result.
pub struct ScreenerReport<'a> {
    result: &'a ScreenerResult,
}

impl<'a> ScreenerReport<'a> {
    pub fn new(result: &'a ScreenerResult) -> Self {
        Self { result }
    }

    /// Generate report in the specified format.
    pub fn generate(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Markdown => self.to_markdown(),
            ReportFormat::Json => self.to_json(),
        }
    }

    /// Save report to file, adding the format's extension when `path` has none.
    pub fn save_to_file(&self, path: &Path, format: ReportFormat) -> Result<PathBuf> {
        let file_path = if path.extension().is_none() {
            path.with_extension(format.extension())
        } else {
            path.to_path_buf()
        };

        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create report directory")?;
        }

        std::fs::write(&file_path, self.generate(format))
            .with_context(|| format!("Failed to write report file {}", file_path.display()))?;

        Ok(file_path)
    }

    /// Generate markdown report.
    pub fn to_markdown(&self) -> String {
        let r = self.result;
        let stats = &r.stats;
        let mut md = String::new();

        // Header
        let _ = write!(
            md,
            "# 科技成长股筛选报告\n\n**扫描ID**: {}\n**时间**: {}\n**耗时**: {:.1}秒\n\n",
            r.id,
            r.completed_at.format("%Y-%m-%d %H:%M:%S"),
            r.duration_secs
        );

        // Parameters
        md.push_str("## 筛选条件\n\n");
        for (key, value) in &r.params_summary {
            let _ = writeln!(md, "- **{}**: {}", key, value);
        }
        md.push('\n');

        // Funnel
        md.push_str("## 筛选漏斗\n\n");
        md.push_str("| 阶段 | 数量 |\n");
        md.push_str("|------|------|\n");
        for (label, count) in [
            ("股票池", stats.universe_size),
            ("有效行情", stats.valid_quotes),
            ("行业匹配", stats.category_matched),
            ("行情筛选通过", stats.after_cheap_filter),
            ("财务筛选通过", stats.after_expensive_filter),
            ("最终入选", r.candidates.len()),
        ] {
            let _ = writeln!(md, "| {} | {} |", label, count);
        }
        md.push('\n');

        if !stats.skipped.is_empty() {
            md.push_str("### 淘汰原因\n\n");
            md.push_str("| 阶段 | 原因 | 数量 |\n");
            md.push_str("|------|------|------|\n");
            for stage in [FilterStage::Cheap, FilterStage::Expensive] {
                for (reason, count) in stats.skipped.iter().filter(|(r, _)| r.stage() == stage) {
                    let _ = writeln!(md, "| {} | {} | {} |", stage, reason, count);
                }
            }
            md.push('\n');
        }

        // Candidates
        md.push_str("## 入选股票\n\n");
        if r.candidates.is_empty() {
            md.push_str("无符合条件的股票。\n\n");
        } else {
            md.push_str("| 排名 | 代码 | 名称 | 行业 | 现价 | PE | PB | 市值(亿) | 52周低 | 平均营收增长 | 平均净利增长 |\n");
            md.push_str("|------|------|------|------|------|----|----|----------|--------|--------------|--------------|\n");
            for (i, c) in r.candidates.iter().enumerate() {
                let _ = writeln!(
                    md,
                    "| {} | {} | {} | {} | {:.2} | {:.1} | {:.2} | {:.1} | {:.2} | {} | {} |",
                    i + 1,
                    c.code,
                    c.name,
                    c.category,
                    c.price,
                    c.pe,
                    c.pb,
                    c.market_cap,
                    c.week_52_low,
                    percent(c.avg_revenue_growth),
                    percent(c.avg_profit_growth),
                );
            }
            md.push('\n');
        }

        // Footer
        md.push_str("---\n\n");
        let _ = writeln!(
            md,
            "*报告生成于 {} UTC*",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );

        md
    }

    /// Generate JSON report.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self.result).unwrap_or_else(|_| "{}".to_string())
    }
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.1}%", v))
}

// ============================================================================
// Report Emitter
// ============================================================================

/// Consumer of finished runs.
#[async_trait]
pub trait ReportEmitter: Send + Sync {
    /// Publish a result. Returns the locations written, if any.
    async fn emit(&self, result: &ScreenerResult, config: &ScreenerConfig) -> Result<Vec<PathBuf>>;
}

/// Writes one file per configured format into a report directory.
pub struct FileReportEmitter {
    dir: PathBuf,
}

impl FileReportEmitter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Emitter writing to the configured (expanded) report directory.
    pub fn from_config(config: &ScreenerConfig) -> Self {
        Self::new(config.report_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReportEmitter for FileReportEmitter {
    async fn emit(&self, result: &ScreenerResult, config: &ScreenerConfig) -> Result<Vec<PathBuf>> {
        if !config.output.enabled {
            return Ok(Vec::new());
        }

        let report = ScreenerReport::new(result);
        let base = self.dir.join(&result.id);
        let mut written = Vec::new();

        for raw in &config.output.formats {
            let format = match raw.parse::<ReportFormat>() {
                Ok(format) => format,
                Err(e) => {
                    warn!(format = %raw, error = %e, "Skipping unknown report format");
                    continue;
                }
            };
            let path = report.save_to_file(&base, format)?;
            info!(path = %path.display(), %format, "Report saved");
            written.push(path);
        }

        Ok(written)
    }
}

// ============================================================================
// Tests
// ============================================================================
