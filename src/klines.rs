use crate::error::FetchError;
use crate::storage_utils::ProviderConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

/// How far back a fetch reaches, in calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookback {
    pub months: u32,
}

impl Lookback {
    pub fn months(months: u32) -> Self {
        Self { months }
    }

    /// Provider range parameter, e.g. "2mo".
    pub fn range(&self) -> String {
        format!("{}mo", self.months)
    }

    /// Rough count of trading days covered (about 21 per month).
    pub fn approx_trading_days(&self) -> usize {
        self.months as usize * 21
    }
}

impl Default for Lookback {
    fn default() -> Self {
        Self::months(2)
    }
}

/// One daily bar. Only `close` matters to the screener; the rest is carried
/// because providers return it.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub symbol: String,
    pub bars: Vec<DailyBar>,
}

/// Source of daily price history for one symbol.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn fetch_daily(
        &self,
        symbol: &str,
        lookback: Lookback,
    ) -> Result<PriceHistory, FetchError>;
}

// --- Yahoo Finance chart endpoint ---

pub struct YahooProvider {
    client: Client,
    base_url: String,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(50)
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PriceProvider for YahooProvider {
    async fn fetch_daily(
        &self,
        symbol: &str,
        lookback: Lookback,
    ) -> Result<PriceHistory, FetchError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let query = [
            ("range", lookback.range()),
            ("interval", "1d".to_string()),
            ("includeAdjustedClose", "true".to_string()),
        ];

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NoData(symbol.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        let history = parse_chart(symbol, &body)?;
        tracing::debug!(symbol, bars = history.bars.len(), "fetched daily bars");
        Ok(history)
    }
}

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Deserialize, Debug)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteColumns>,
    #[serde(default)]
    adjclose: Vec<AdjCloseColumn>,
}

#[derive(Deserialize, Debug, Default)]
struct QuoteColumns {
    #[serde(default)]
    open: Vec<LenientF64>,
    #[serde(default)]
    high: Vec<LenientF64>,
    #[serde(default)]
    low: Vec<LenientF64>,
    #[serde(default)]
    close: Vec<LenientF64>,
    #[serde(default)]
    volume: Vec<LenientF64>,
}

#[derive(Deserialize, Debug)]
struct AdjCloseColumn {
    #[serde(default)]
    adjclose: Vec<LenientF64>,
}

/// A number that may arrive as float, integer, numeric string or null.
#[derive(Debug, Clone, Copy, Default)]
struct LenientF64(Option<f64>);

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = Option<f64>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, a numeric string or null")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(Some(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Some(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if v.trim().is_empty() {
            Ok(None)
        } else {
            v.trim().parse::<f64>().map(Some).map_err(E::custom)
        }
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E> {
        Ok(None)
    }
}

impl<'de> Deserialize<'de> for LenientF64 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientF64Visitor).map(LenientF64)
    }
}

fn column_value(column: &[LenientF64], i: usize) -> Option<f64> {
    column.get(i).and_then(|v| v.0)
}

/// Decode a chart response body into bars. Adjusted closes replace raw
/// closes when the response carries them.
pub(crate) fn parse_chart(symbol: &str, body: &[u8]) -> Result<PriceHistory, FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if let Some(err) = envelope.chart.error {
        return Err(FetchError::NoData(format!(
            "{symbol}: {} {}",
            err.code, err.description
        )));
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| FetchError::NoData(symbol.to_string()))?;

    let n = result.timestamp.len();
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::Malformed("missing quote columns".to_string()))?;

    let closes = match result.indicators.adjclose.into_iter().next() {
        Some(adj) if !adj.adjclose.is_empty() => adj.adjclose,
        _ => quote.close,
    };

    if closes.len() != n {
        return Err(FetchError::Malformed(format!(
            "{} timestamps but {} closes",
            n,
            closes.len()
        )));
    }

    let mut bars = Vec::with_capacity(n);
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let date = DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| FetchError::Malformed(format!("bad timestamp {ts}")))?
            .date_naive();
        bars.push(DailyBar {
            date,
            open: column_value(&quote.open, i),
            high: column_value(&quote.high, i),
            low: column_value(&quote.low, i),
            close: column_value(&closes, i),
            volume: column_value(&quote.volume, i),
        });
    }

    Ok(PriceHistory {
        symbol: symbol.to_string(),
        bars,
    })
}
