//! Market-data collaborators: a live Yahoo Finance provider and a
//! deterministic synthetic (demo) provider behind one enum. The pipeline only
//! sees the aligned `PriceTable` contract and is indifferent to the source.

use chrono::{Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{info, warn};

use crate::calibrate::ReturnSeries;
use crate::error::{Result, RiskError};

const SEARCH_RESULTS_MAX: usize = 20;
const FETCH_ATTEMPTS: usize = 3;

/// Selected once at process configuration time and passed into the server;
/// nothing downstream branches on environment state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketDataProvider {
    Live,
    Demo,
}

#[derive(Clone, Debug, Serialize)]
pub struct InstrumentMatch {
    pub security: String,
    pub description: String,
}

/// Price history aligned on a common business-day index, forward-filled,
/// with rows containing any missing value dropped. Rows = dates in ascending
/// order, columns = tickers in request order.
#[derive(Clone, Debug)]
pub struct PriceTable {
    pub tickers: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub prices: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Daily log-returns between consecutive aligned rows, T−1 × N.
    pub fn log_returns(&self) -> Result<ReturnSeries> {
        if self.prices.len() < 2 {
            return Err(RiskError::InsufficientData(format!(
                "{} aligned price rows are not enough to form returns",
                self.prices.len()
            )));
        }
        let rows = self
            .prices
            .windows(2)
            .map(|w| {
                w[1].iter()
                    .zip(w[0].iter())
                    .map(|(next, prev)| (next / prev).ln())
                    .collect()
            })
            .collect();
        ReturnSeries::new(rows)
    }

    /// Last observed price per ticker (the simulation S0 anchor).
    pub fn last_prices(&self) -> Result<&[f64]> {
        self.prices
            .last()
            .map(Vec::as_slice)
            .ok_or_else(|| RiskError::InsufficientData("price table is empty".to_string()))
    }
}

impl MarketDataProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Demo => "demo",
        }
    }

    pub fn is_demo(self) -> bool {
        matches!(self, Self::Demo)
    }

    pub async fn search(self, query: &str, category: &str) -> Result<Vec<InstrumentMatch>> {
        match self {
            Self::Demo => Ok(demo_search(query)),
            Self::Live => live_search(query, category).await,
        }
    }

    /// Aligned daily close history for `tickers` between `start` and `end`
    /// inclusive. `use_total_return` selects the dividend-adjusted series
    /// when the live source provides one; the demo provider ignores it.
    pub async fn history(
        self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
        use_total_return: bool,
    ) -> Result<PriceTable> {
        if tickers.is_empty() {
            return Err(RiskError::Validation("tickers cannot be empty".to_string()));
        }
        if end < start {
            return Err(RiskError::Validation(format!(
                "end date {end} precedes start date {start}"
            )));
        }
        match self {
            Self::Demo => demo_history(tickers, start, end),
            Self::Live => live_history(tickers, start, end, use_total_return).await,
        }
    }
}

// ── Demo provider ───────────────────────────────────────────────────────────

const DEMO_UNIVERSE: &[(&str, &str)] = &[
    ("AAPL US Equity", "Apple Inc"),
    ("MSFT US Equity", "Microsoft Corp"),
    ("GOOGL US Equity", "Alphabet Inc Class A"),
    ("AMZN US Equity", "Amazon.com Inc"),
    ("TSLA US Equity", "Tesla Inc"),
    ("NVDA US Equity", "NVIDIA Corp"),
    ("SPY US Equity", "SPDR S&P 500 ETF Trust"),
    ("QQQ US Equity", "Invesco QQQ Trust"),
    ("META US Equity", "Meta Universe"),
];

fn demo_search(query: &str) -> Vec<InstrumentMatch> {
    let q = query.to_lowercase();
    DEMO_UNIVERSE
        .iter()
        .filter(|(security, description)| {
            security.to_lowercase().contains(&q) || description.to_lowercase().contains(&q)
        })
        .map(|(security, description)| InstrumentMatch {
            security: (*security).to_string(),
            description: (*description).to_string(),
        })
        .take(SEARCH_RESULTS_MAX)
        .collect()
}

/// Synthetic GBM history, deterministic for a given ticker list: the RNG is
/// seeded from a hash of the joined tickers, so repeated calibrations of the
/// same basket see the same prices.
fn demo_history(tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable> {
    let dates = business_days(start, end);
    if dates.is_empty() {
        return Err(RiskError::MarketData(format!(
            "no business days between {start} and {end}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(ticker_seed(tickers));
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(tickers.len());
    for _ in tickers {
        let drift = rng.gen_range(0.05..0.12) / 252.0;
        let vol = rng.gen_range(0.15..0.35) / 252.0_f64.sqrt();
        let mut cum = 0.0;
        let column = (0..dates.len())
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut rng);
                cum += z * vol + drift;
                100.0 * cum.exp()
            })
            .collect();
        columns.push(column);
    }

    let prices = (0..dates.len())
        .map(|row| columns.iter().map(|col| col[row]).collect())
        .collect();

    Ok(PriceTable {
        tickers: tickers.to_vec(),
        dates,
        prices,
    })
}

fn ticker_seed(tickers: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    tickers.join("|").hash(&mut hasher);
    hasher.finish()
}

// ── Live provider (Yahoo Finance) ───────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Vec<YahooChartResult>,
}

#[derive(Deserialize, Debug)]
struct YahooChartResult {
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    close: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct YahooAdjClose {
    adjclose: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct YahooSearchResponse {
    quotes: Vec<YahooSearchQuote>,
}

#[derive(Deserialize, Debug)]
struct YahooSearchQuote {
    symbol: Option<String>,
    #[serde(rename = "shortname")]
    short_name: Option<String>,
    #[serde(rename = "longname")]
    long_name: Option<String>,
    #[serde(rename = "quoteType")]
    quote_type: Option<String>,
}

async fn live_search(query: &str, category: &str) -> Result<Vec<InstrumentMatch>> {
    let url = format!(
        "https://query1.finance.yahoo.com/v1/finance/search?q={}&quotesCount={}",
        query, SEARCH_RESULTS_MAX
    );
    let parsed: YahooSearchResponse = fetch_json(&url, query).await?;

    let matches = parsed
        .quotes
        .into_iter()
        .filter(|q| {
            category.is_empty()
                || q.quote_type
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(category))
        })
        .filter_map(|q| {
            let security = q.symbol?;
            let description = q.long_name.or(q.short_name).unwrap_or_default();
            Some(InstrumentMatch {
                security,
                description,
            })
        })
        .take(SEARCH_RESULTS_MAX)
        .collect();
    Ok(matches)
}

async fn live_history(
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
    use_total_return: bool,
) -> Result<PriceTable> {
    let mut per_ticker = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let series = live_history_one(ticker, start, end, use_total_return).await?;
        if series.is_empty() {
            return Err(RiskError::MarketData(format!(
                "no price history for {ticker} between {start} and {end}"
            )));
        }
        info!("Fetched {} daily closes for {}", series.len(), ticker);
        per_ticker.push(series);
    }
    align_forward_fill(tickers, &per_ticker)
}

async fn live_history_one(
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
    use_total_return: bool,
) -> Result<Vec<(NaiveDate, f64)>> {
    let period1 = midnight_utc(start).timestamp();
    let period2 = midnight_utc(end + Duration::days(1)).timestamp();
    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{ticker}?period1={period1}&period2={period2}&interval=1d"
    );

    let parsed: YahooChartResponse = fetch_json(&url, ticker).await?;
    let result = parsed
        .chart
        .result
        .into_iter()
        .next()
        .ok_or_else(|| RiskError::MarketData(format!("no chart data for {ticker}")))?;

    let raw_close = result
        .indicators
        .quote
        .first()
        .map(|q| q.close.as_slice())
        .ok_or_else(|| RiskError::MarketData(format!("no quote data for {ticker}")))?;
    let adj_close = result
        .indicators
        .adjclose
        .as_ref()
        .and_then(|a| a.first())
        .map(|a| a.adjclose.as_slice());
    let closes = if use_total_return {
        adj_close.unwrap_or_else(|| {
            warn!("{}: adjusted close unavailable, falling back to raw close", ticker);
            raw_close
        })
    } else {
        raw_close
    };

    let series = result
        .timestamp
        .iter()
        .zip(closes.iter())
        .filter_map(|(&ts, close)| {
            let date = Utc.timestamp_opt(ts, 0).single()?.date_naive();
            close.map(|c| (date, c))
        })
        .collect();
    Ok(series)
}

async fn fetch_json<T: serde::de::DeserializeOwned>(url: &str, context: &str) -> Result<T> {
    let client = reqwest::Client::new();
    let mut last_error: Option<String> = None;

    for attempt in 1..=FETCH_ATTEMPTS {
        let response = match client
            .get(url)
            .header("User-Agent", "Mozilla/5.0")
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                last_error = Some(e.to_string());
                if attempt < FETCH_ATTEMPTS {
                    warn!(
                        "Fetch failed for {} (attempt {}/{}): retrying",
                        context, attempt, FETCH_ATTEMPTS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
                continue;
            }
        };

        match response.json::<T>().await {
            Ok(parsed) => return Ok(parsed),
            Err(e) => {
                last_error = Some(e.to_string());
                if attempt < FETCH_ATTEMPTS {
                    warn!(
                        "Failed to parse response for {} (attempt {}/{}): retrying",
                        context, attempt, FETCH_ATTEMPTS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                }
            }
        }
    }

    Err(RiskError::MarketData(format!(
        "fetch failed for {context}: {}",
        last_error.unwrap_or_else(|| "unknown error".to_string())
    )))
}

fn midnight_utc(date: NaiveDate) -> chrono::DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
}

// ── Alignment ───────────────────────────────────────────────────────────────

/// Weekday dates between `start` and `end` inclusive. Exchange holidays are
/// not modeled; forward-fill absorbs them.
fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut out = Vec::new();
    let mut day = start;
    while day <= end {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        day += Duration::days(1);
    }
    out
}

/// Aligns per-ticker (date, price) series onto a shared business-day index:
/// forward-fill within each column, then drop rows where any column is still
/// unobserved (leading gaps).
fn align_forward_fill(
    tickers: &[String],
    per_ticker: &[Vec<(NaiveDate, f64)>],
) -> Result<PriceTable> {
    let first = per_ticker
        .iter()
        .filter_map(|s| s.first().map(|(d, _)| *d))
        .min()
        .ok_or_else(|| RiskError::MarketData("no price observations to align".to_string()))?;
    let last = per_ticker
        .iter()
        .filter_map(|s| s.last().map(|(d, _)| *d))
        .max()
        .ok_or_else(|| RiskError::MarketData("no price observations to align".to_string()))?;

    let index = business_days(first, last);
    let maps: Vec<HashMap<NaiveDate, f64>> = per_ticker
        .iter()
        .map(|series| series.iter().copied().collect())
        .collect();

    let mut carried: Vec<Option<f64>> = vec![None; tickers.len()];
    let mut dates = Vec::with_capacity(index.len());
    let mut prices = Vec::with_capacity(index.len());
    for date in index {
        for (slot, map) in carried.iter_mut().zip(maps.iter()) {
            if let Some(&price) = map.get(&date) {
                *slot = Some(price);
            }
        }
        if let Some(row) = carried.iter().copied().collect::<Option<Vec<f64>>>() {
            dates.push(date);
            prices.push(row);
        }
    }

    Ok(PriceTable {
        tickers: tickers.to_vec(),
        dates,
        prices,
    })
}
