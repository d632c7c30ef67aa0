//! Tencent real-time quote adapter.
//!
//! Endpoint: `http://qt.gtimg.cn/q=sh600000,sz000001,...`
//!
//! The response is GBK-encoded, one line per identifier:
//!
//! ```text
//! v_sh600000="1~浦发银行~600000~10.50~...~";
//! ```
//!
//! Fields are `~`-separated. Unknown identifiers come back as `v_pv_none_match="1";`
//! or are omitted; both read as absence.

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use super::provider::{ProviderError, QuoteSource};
use super::{Quote, Universe};

// ============================================================================
// Constants
// ============================================================================

/// Tencent quote API (identifiers appended, comma-separated)
const TENCENT_QUOTE_URL: &str = "http://qt.gtimg.cn/q=";

static QUOTE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"v_(\w+)="([^"]*)""#).unwrap());

// Field positions within a quote line
const FIELD_NAME: usize = 1;
const FIELD_PRICE: usize = 3;
const FIELD_PE: usize = 39;
const FIELD_MARKET_CAP: usize = 44;
const FIELD_PB: usize = 46;
const FIELD_LOW_52W: usize = 47;
const FIELD_HIGH_52W: usize = 48;

// ============================================================================
// Symbol Mapping
// ============================================================================

/// Convert a bare code to Tencent format.
///
/// "600000" -> "sh600000", "000001" -> "sz000001". Already-prefixed
/// identifiers are returned unchanged.
pub fn to_tencent_id(code: &str) -> String {
    if code.len() != 6 {
        return code.to_string();
    }
    if code.starts_with('6') {
        format!("sh{code}")
    } else {
        format!("sz{code}")
    }
}

/// "sh600000" -> "600000"
fn from_tencent_id(id: &str) -> &str {
    match id.get(..2) {
        Some("sh" | "sz" | "bj") if id.len() > 6 => &id[2..],
        _ => id,
    }
}

fn parse_number(field: Option<&&str>) -> f64 {
    field
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Parse a decoded response body into quotes keyed by bare code.
///
/// Lines with too few fields are skipped. Empty numeric fields read as 0.
pub(crate) fn parse_quotes(body: &str) -> HashMap<String, Quote> {
    let mut quotes = HashMap::new();

    for caps in QUOTE_LINE.captures_iter(body) {
        let id = &caps[1];
        let fields: Vec<&str> = caps[2].split('~').collect();
        if fields.len() <= FIELD_LOW_52W {
            continue;
        }

        let code = from_tencent_id(id).to_string();
        quotes.insert(
            code.clone(),
            Quote {
                code,
                name: fields[FIELD_NAME].trim().to_string(),
                price: parse_number(fields.get(FIELD_PRICE)),
                pe: parse_number(fields.get(FIELD_PE)),
                pb: parse_number(fields.get(FIELD_PB)),
                market_cap: parse_number(fields.get(FIELD_MARKET_CAP)),
                week_52_low: parse_number(fields.get(FIELD_LOW_52W)),
                week_52_high: parse_number(fields.get(FIELD_HIGH_52W)),
            },
        );
    }

    quotes
}

// ============================================================================
// Tencent Adapter
// ============================================================================

/// Batch quote source backed by the Tencent quote API.
pub struct TencentQuoteSource {
    client: reqwest::Client,
    universe: Universe,
}

impl TencentQuoteSource {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            universe: Universe::a_share(),
        }
    }

    /// Restrict the universe (e.g. to a watch list).
    pub fn with_universe(mut self, universe: Universe) -> Self {
        self.universe = universe;
        self
    }
}

impl Default for TencentQuoteSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QuoteSource for TencentQuoteSource {
    fn name(&self) -> &'static str {
        "tencent"
    }

    fn universe(&self) -> Universe {
        self.universe.clone()
    }

    fn normalize(&self, code: &str) -> String {
        to_tencent_id(code)
    }

    async fn fetch_chunk(&self, codes: &[String]) -> Result<HashMap<String, Quote>, ProviderError> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<String> = codes.iter().map(|c| to_tencent_id(c)).collect();
        let url = format!("{}{}", TENCENT_QUOTE_URL, ids.join(","));

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body = response.text_with_charset("gbk").await?;

        let quotes = parse_quotes(&body);
        debug!(requested = codes.len(), parsed = quotes.len(), "Tencent chunk parsed");
        Ok(quotes)
    }
}
