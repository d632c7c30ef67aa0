//! Eastmoney annual performance report adapter.
//!
//! Endpoint: `https://datacenter-web.eastmoney.com/api/data/v1/get`
//! with `reportName=RPT_FCI_PERFORMANCEE`. The endpoint has no batch form,
//! so each instrument costs one round-trip.
//!
//! Rows mix quarterly and annual filings; only rows whose `DATATYPE`
//! mentions 年报 (annual report) are kept.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::provider::{ProviderError, ReportSource};
use super::{AnnualRecord, FinancialReport};

// ============================================================================
// Constants
// ============================================================================

/// Eastmoney data center API
const EASTMONEY_DATA_URL: &str = "https://datacenter-web.eastmoney.com/api/data/v1/get";

/// Performance report dataset
const PERFORMANCE_REPORT: &str = "RPT_FCI_PERFORMANCEE";

/// Rows requested per call; enough to cover three annual filings among quarterlies
const PAGE_SIZE: &str = "10";

const ANNUAL_MARKER: &str = "年报";

// ============================================================================
// Symbol Mapping
// ============================================================================

/// Convert a bare code to Eastmoney format: "600000" -> "SH600000".
pub fn to_eastmoney_id(code: &str) -> String {
    if code.len() != 6 {
        return code.to_uppercase();
    }
    if code.starts_with('6') {
        format!("SH{code}")
    } else {
        format!("SZ{code}")
    }
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
struct EastmoneyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<EastmoneyResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EastmoneyResult {
    #[serde(default)]
    data: Vec<PerformanceRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct PerformanceRow {
    #[serde(default)]
    datatype: Option<String>,
    #[serde(default)]
    report_date: Option<String>,
    #[serde(default)]
    total_operate_income: Option<f64>,
    #[serde(default)]
    parent_netprofit: Option<f64>,
    /// Revenue YoY growth (%)
    #[serde(default)]
    ystz: Option<f64>,
    /// Net profit YoY growth (%)
    #[serde(default)]
    jlrtbzcl: Option<f64>,
}

impl PerformanceRow {
    fn is_annual(&self) -> bool {
        self.datatype
            .as_deref()
            .is_some_and(|t| t.contains(ANNUAL_MARKER))
    }

    /// Missing figures read as 0, matching how upstream leaves blanks.
    fn to_record(&self) -> Option<AnnualRecord> {
        let year = self.report_date.as_deref()?.get(..4)?.parse().ok()?;
        Some(AnnualRecord {
            year,
            revenue: self.total_operate_income.unwrap_or(0.0),
            profit: self.parent_netprofit.unwrap_or(0.0),
            revenue_growth: self.ystz.unwrap_or(0.0),
            profit_growth: self.jlrtbzcl.unwrap_or(0.0),
        })
    }
}

/// Parse a response into a report. `None` when upstream has no annual rows.
fn parse_report(code: &str, response: EastmoneyResponse) -> Option<FinancialReport> {
    if !response.success {
        debug!(
            code,
            message = response.message.as_deref().unwrap_or_default(),
            "Eastmoney returned no report"
        );
        return None;
    }
    let rows = response.result?.data;
    let records: Vec<AnnualRecord> = rows
        .iter()
        .filter(|row| row.is_annual())
        .filter_map(PerformanceRow::to_record)
        .collect();

    if records.is_empty() {
        return None;
    }
    Some(FinancialReport::new(code, records))
}

// ============================================================================
// Eastmoney Adapter
// ============================================================================

/// Single-item report source backed by the Eastmoney data center.
pub struct EastmoneyReportSource {
    client: reqwest::Client,
}

impl EastmoneyReportSource {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }
}

impl Default for EastmoneyReportSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportSource for EastmoneyReportSource {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    fn normalize(&self, code: &str) -> String {
        to_eastmoney_id(code)
    }

    async fn fetch_report(&self, code: &str) -> Result<Option<FinancialReport>, ProviderError> {
        let filter = format!("(SECURITY_CODE=\"{code}\")");
        let response = self
            .client
            .get(EASTMONEY_DATA_URL)
            .query(&[
                ("reportName", PERFORMANCE_REPORT),
                ("columns", "ALL"),
                ("filter", filter.as_str()),
                ("pageSize", PAGE_SIZE),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: EastmoneyResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let report = parse_report(code, body);
        debug!(
            code,
            years = report.as_ref().map_or(0, |r| r.records.len()),
            "Eastmoney report parsed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(value: serde_json::Value) -> EastmoneyResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_to_eastmoney_id() {
        assert_eq!(to_eastmoney_id("600000"), "SH600000");
        assert_eq!(to_eastmoney_id("000001"), "SZ000001");
        assert_eq!(to_eastmoney_id("301999"), "SZ301999");
    }

    #[test]
    fn test_parse_report_keeps_annual_rows() {
        let body = response(json!({
            "success": true,
            "result": {
                "data": [
                    {"DATATYPE": "2024年 一季报", "REPORT_DATE": "2024-03-31 00:00:00", "YSTZ": 5.0, "JLRTBZCL": 6.0},
                    {"DATATYPE": "2023年 年报", "REPORT_DATE": "2023-12-31 00:00:00",
                     "TOTAL_OPERATE_INCOME": 1.5e9, "PARENT_NETPROFIT": 2.0e8, "YSTZ": 35.2, "JLRTBZCL": 41.0},
                    {"DATATYPE": "2022年 年报", "REPORT_DATE": "2022-12-31 00:00:00", "YSTZ": 50.0, "JLRTBZCL": null},
                    {"DATATYPE": "2021年 年报", "REPORT_DATE": "2021-12-31 00:00:00", "YSTZ": 45.0, "JLRTBZCL": 60.0},
                    {"DATATYPE": "2020年 年报", "REPORT_DATE": "2020-12-31 00:00:00", "YSTZ": 10.0, "JLRTBZCL": 10.0}
                ]
            }
        }));

        let report = parse_report("300750", body).unwrap();
        assert_eq!(report.code, "300750");
        let years: Vec<i32> = report.records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2023, 2022, 2021]);
        assert_eq!(report.records[0].revenue, 1.5e9);
        assert_eq!(report.records[0].revenue_growth, 35.2);
        assert_eq!(report.records[1].profit_growth, 0.0);
        assert_eq!(report.records[1].revenue, 0.0);
    }

    #[test]
    fn test_parse_report_empty() {
        let body = response(json!({"success": false, "message": "返回数据为空", "code": 9201}));
        assert_eq!(body.message.as_deref(), Some("返回数据为空"));
        assert!(parse_report("600000", body).is_none());

        let body = response(json!({"success": true, "result": {"data": [
            {"DATATYPE": "2024年 一季报", "REPORT_DATE": "2024-03-31 00:00:00"}
        ]}}));
        assert!(parse_report("600000", body).is_none());

        let body = response(json!({"success": true, "result": null}));
        assert!(parse_report("600000", body).is_none());
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_fetch_report() {
        let source = EastmoneyReportSource::new();
        let report = source.fetch_report("600000").await.unwrap();
        assert!(report.is_some());
    }
}
