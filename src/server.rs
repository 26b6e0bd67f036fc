//! HTTP JSON API: search, calibrate, simulate, and a root health probe.
//!
//! Handlers validate and translate between wire shapes and the pipeline; all
//! numerics live in the calibrate/stabilize/simulate/risk modules.

use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::routing::{get, post};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::calibrate::calibrate;
use crate::config::{APP_TITLE, DEFAULT_DAYS, DEFAULT_DOF, DEFAULT_N_SIMS};
use crate::error::RiskError;
use crate::marketdata::{InstrumentMatch, MarketDataProvider, PriceTable};
use crate::risk::{RiskSummary, summarize_pnl};
use crate::simulate::{
    DriftMode, SimulationSpec, aggregate_portfolio, effective_drift, simulate_price_ensemble,
};
use crate::stabilize::stable_cholesky;

#[derive(Clone, Copy)]
struct AppState {
    provider: MarketDataProvider,
    max_ensemble_cells: usize,
}

#[derive(Clone, Debug, Serialize)]
struct ApiError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(rename = "yellowKey", default = "default_category")]
    yellow_key: String,
}

fn default_category() -> String {
    "Equity".to_string()
}

#[derive(Debug, Deserialize)]
struct CalibrateRequest {
    tickers: Vec<String>,
    start: String,
    end: String,
    #[serde(default = "default_periodicity")]
    periodicity: String,
    #[serde(rename = "adjustSplits", default = "default_true")]
    adjust_splits: bool,
    #[serde(rename = "adjustDividends", default = "default_true")]
    adjust_dividends: bool,
    #[serde(rename = "useTotalReturnField", default)]
    use_total_return_field: bool,
}

fn default_periodicity() -> String {
    "DAILY".to_string()
}

fn default_true() -> bool {
    true
}

/// Per-ticker calibration triple as it travels over the wire; the client
/// echoes these back verbatim in the simulate request.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct TickerParams {
    #[serde(rename = "S0")]
    pub s0: f64,
    pub mu: f64,
    pub vol: f64,
}

#[derive(Debug, Serialize)]
struct CalibrateResponse {
    tickers: Vec<String>,
    #[serde(rename = "paramsPerTicker")]
    params_per_ticker: HashMap<String, TickerParams>,
    corr: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct Position {
    ticker: String,
    qty: f64,
}

#[derive(Debug, Default, Deserialize)]
struct CalibrationPayload {
    #[serde(rename = "paramsPerTicker", default)]
    params_per_ticker: HashMap<String, TickerParams>,
    #[serde(default)]
    corr: Vec<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    positions: Vec<Position>,
    #[serde(default = "default_days")]
    days: usize,
    #[serde(rename = "nSims", default = "default_n_sims")]
    n_sims: usize,
    #[serde(rename = "driftMode", default)]
    drift_mode: DriftMode,
    #[serde(rename = "useStudentT", default = "default_true")]
    use_student_t: bool,
    #[serde(default)]
    dof: Option<u32>,
    #[serde(default)]
    seed: Option<u64>,
    calibration: CalibrationPayload,
}

fn default_days() -> usize {
    DEFAULT_DAYS
}

fn default_n_sims() -> usize {
    DEFAULT_N_SIMS
}

#[derive(Debug, Serialize)]
struct SimulateResponse {
    pv0: f64,
    pnl: Vec<f64>,
    #[serde(rename = "pathsSample")]
    paths_sample: Vec<Vec<f64>>,
    summary: RiskSummary,
}

pub async fn run_server(
    port: u16,
    provider: MarketDataProvider,
    max_ensemble_cells: usize,
    allow_origins: &[String],
) -> Result<()> {
    let state = AppState {
        provider,
        max_ensemble_cells,
    };

    let app = Router::new()
        .route("/", get(health))
        .route("/api/search", post(search))
        .route("/api/calibrate", post(api_calibrate))
        .route("/api/simulate", post(api_simulate))
        .layer(cors_layer(allow_origins))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(
        "{} listening on http://{} ({} data)",
        APP_TITLE,
        addr,
        provider.as_str()
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Browser clients send credentials, and the CORS middleware refuses the
/// wildcard in that combination, so "*" gets the credential-less permissive
/// layer while explicit origins get the full one.
fn cors_layer(allow_origins: &[String]) -> CorsLayer {
    if allow_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allow_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid origin in ALLOW_ORIGINS: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "app": APP_TITLE,
        "demo": state.provider.is_demo(),
    }))
}

async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<Vec<InstrumentMatch>>, (StatusCode, Json<ApiError>)> {
    state
        .provider
        .search(&req.query, &req.yellow_key)
        .await
        .map(Json)
        .map_err(|e| {
            api_err(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("Search failed: {e}"),
            )
        })
}

async fn api_calibrate(
    State(state): State<AppState>,
    Json(req): Json<CalibrateRequest>,
) -> Result<Json<CalibrateResponse>, (StatusCode, Json<ApiError>)> {
    if req.tickers.is_empty() {
        return Err(api_err(StatusCode::BAD_REQUEST, "tickers cannot be empty"));
    }
    debug!(
        "calibrating {} tickers, {} bars, splits={} dividends={}",
        req.tickers.len(),
        req.periodicity,
        req.adjust_splits,
        req.adjust_dividends
    );

    let start = parse_date(&req.start).map_err(|e| pipeline_err("Calibration failed", e))?;
    let end = parse_date(&req.end).map_err(|e| pipeline_err("Calibration failed", e))?;

    let table = state
        .provider
        .history(&req.tickers, start, end, req.use_total_return_field)
        .await
        .map_err(|e| pipeline_err("Calibration failed", e))?;
    debug!(
        "aligned {} rows spanning {:?}..{:?}",
        table.dates.len(),
        table.dates.first(),
        table.dates.last()
    );

    calibration_response(&table).map(Json).map_err(|e| pipeline_err("Calibration failed", e))
}

/// Aligned prices in, wire-shaped calibration out. Pure given the table.
fn calibration_response(table: &PriceTable) -> crate::error::Result<CalibrateResponse> {
    let returns = table.log_returns()?;
    let cal = calibrate(&returns)?;
    let last = table.last_prices()?;

    let params_per_ticker = table
        .tickers
        .iter()
        .enumerate()
        .map(|(i, t)| {
            (
                t.clone(),
                TickerParams {
                    s0: last[i],
                    mu: cal.mu[i],
                    vol: cal.vol[i],
                },
            )
        })
        .collect();

    Ok(CalibrateResponse {
        tickers: table.tickers.clone(),
        params_per_ticker,
        corr: cal.corr,
    })
}

async fn api_simulate(
    State(state): State<AppState>,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<SimulateResponse>, (StatusCode, Json<ApiError>)> {
    run_simulation(&req, state.max_ensemble_cells)
        .map(Json)
        .map_err(|e| pipeline_err("Simulation failed", e))
}

/// The full simulate pipeline: resolve calibration per position, stabilize
/// the correlation matrix, simulate, aggregate, summarize.
fn run_simulation(req: &SimulateRequest, max_cells: usize) -> crate::error::Result<SimulateResponse> {
    if req.positions.is_empty() {
        return Err(RiskError::Validation("positions cannot be empty".to_string()));
    }

    let (s0, mu, vol, qty) = resolve_positions(&req.calibration.params_per_ticker, &req.positions)?;
    check_corr_shape(&req.calibration.corr, req.positions.len())?;

    let chol = stable_cholesky(&req.calibration.corr)?;
    let drift = effective_drift(req.drift_mode, &mu);
    let dof = req.dof.filter(|&d| d > 0).unwrap_or(DEFAULT_DOF);

    let spec = SimulationSpec {
        s0: &s0,
        mu: &drift,
        vol: &vol,
        chol: &chol,
        days: req.days,
        n_sims: req.n_sims,
        use_student_t: req.use_student_t,
        dof,
        seed: req.seed,
    };
    let ensemble = simulate_price_ensemble(&spec, max_cells)?;
    let dist = aggregate_portfolio(&ensemble, &qty)?;
    let summary = summarize_pnl(&dist.pnl)?;

    Ok(SimulateResponse {
        pv0: dist.pv0,
        pnl: dist.pnl,
        paths_sample: dist.paths_sample,
        summary,
    })
}

/// Looks up S0/mu/vol for every position, in position order.
fn resolve_positions(
    params: &HashMap<String, TickerParams>,
    positions: &[Position],
) -> crate::error::Result<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    let mut s0 = Vec::with_capacity(positions.len());
    let mut mu = Vec::with_capacity(positions.len());
    let mut vol = Vec::with_capacity(positions.len());
    let mut qty = Vec::with_capacity(positions.len());

    for p in positions {
        let tp = params.get(&p.ticker).ok_or_else(|| {
            RiskError::Validation(format!("Missing calibration for ticker: '{}'", p.ticker))
        })?;
        s0.push(tp.s0);
        mu.push(tp.mu);
        vol.push(tp.vol);
        qty.push(p.qty);
    }
    Ok((s0, mu, vol, qty))
}

fn check_corr_shape(corr: &[Vec<f64>], n: usize) -> crate::error::Result<()> {
    let cols = corr.first().map_or(0, Vec::len);
    if corr.len() != n || corr.iter().any(|row| row.len() != n) {
        return Err(RiskError::DimensionMismatch(format!(
            "Correlation matrix shape ({}, {cols}) does not match number of assets {n}. \
             Did you pass nSims×nSims instead of assets×assets, or skip calibration?",
            corr.len()
        )));
    }
    Ok(())
}

fn parse_date(value: &str) -> crate::error::Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| RiskError::Validation(format!("invalid date '{value}' (expected YYYY-MM-DD)")))
}

fn api_err(status: StatusCode, message: &str) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: message.to_string(),
        }),
    )
}

/// Client mistakes (validation, dimension mismatches) surface as 400 with the
/// bare message; anything else is a 500 carrying the stage prefix.
fn pipeline_err(prefix: &str, err: RiskError) -> (StatusCode, Json<ApiError>) {
    match err {
        RiskError::Validation(_) | RiskError::DimensionMismatch(_) => {
            api_err(StatusCode::BAD_REQUEST, &err.to_string())
        }
        other => api_err(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("{prefix}: {other}"),
        ),
    }
}
