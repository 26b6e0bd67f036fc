//! Correlated geometric-Brownian-motion path simulation and portfolio
//! aggregation.
//!
//! Paths are simulated independently and in parallel across simulations; each
//! path owns a seeded generator derived from the request seed, so results are
//! bit-identical regardless of thread count.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{SAMPLE_PATHS_MAX, TRADING_DAYS};
use crate::error::{Result, RiskError};
use crate::rng::{GaussianShocks, ShockSource, path_seed};

/// Whether simulated growth uses zero drift (risk-neutral short-horizon
/// convention) or the calibrated historical drift.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum DriftMode {
    #[default]
    #[serde(rename = "flat")]
    Flat,
    #[serde(rename = "useMu")]
    UseMu,
}

/// Resolves the drift vector actually fed to the simulator.
pub fn effective_drift(mode: DriftMode, mu: &[f64]) -> Vec<f64> {
    match mode {
        DriftMode::Flat => vec![0.0; mu.len()],
        DriftMode::UseMu => mu.to_vec(),
    }
}

/// Inputs for one simulation run. `chol` is the stabilized lower-triangular
/// correlation factor; `seed` absent means a fresh entropy seed per request.
#[derive(Clone, Copy, Debug)]
pub struct SimulationSpec<'a> {
    pub s0: &'a [f64],
    pub mu: &'a [f64],
    pub vol: &'a [f64],
    pub chol: &'a [Vec<f64>],
    pub days: usize,
    pub n_sims: usize,
    pub use_student_t: bool,
    pub dof: u32,
    pub seed: Option<u64>,
}

/// Simulated prices, shape (nSims × (days+1) × nAssets), row-major.
#[derive(Clone, Debug)]
pub struct PriceEnsemble {
    pub n_sims: usize,
    pub days: usize,
    pub n_assets: usize,
    prices: Vec<f64>,
}

impl PriceEnsemble {
    pub fn price(&self, sim: usize, day: usize, asset: usize) -> f64 {
        self.prices[(sim * (self.days + 1) + day) * self.n_assets + asset]
    }

    fn path(&self, sim: usize) -> &[f64] {
        let stride = (self.days + 1) * self.n_assets;
        &self.prices[sim * stride..(sim + 1) * stride]
    }
}

/// Per-simulation portfolio aggregates derived from a price ensemble.
#[derive(Clone, Debug)]
pub struct PortfolioDistribution {
    /// Day-0 portfolio value, averaged over simulations. Day 0 carries no
    /// randomness, so the paths agree up to floating-point noise; averaging
    /// keeps the reported value stable anyway.
    pub pv0: f64,
    /// Final profit/loss per simulated path.
    pub pnl: Vec<f64>,
    /// Up to 500 evenly-spaced portfolio-value series (day 0 excluded),
    /// deterministic given nSims. Display aid only.
    pub paths_sample: Vec<Vec<f64>>,
}

/// Generates the full correlated price ensemble.
///
/// All shape and parameter validation happens before a single random draw:
/// mismatched Cholesky/parameter dimensions are `DimensionMismatch`, bad
/// counts are `Validation`, and an ensemble larger than `max_cells` is
/// refused as a resource guard.
pub fn simulate_price_ensemble(spec: &SimulationSpec, max_cells: usize) -> Result<PriceEnsemble> {
    let n = spec.s0.len();
    if n == 0 {
        return Err(RiskError::Validation("no assets to simulate".to_string()));
    }
    if spec.mu.len() != n || spec.vol.len() != n {
        return Err(RiskError::DimensionMismatch(format!(
            "mu/vol length ({}/{}) does not match asset count {}",
            spec.mu.len(),
            spec.vol.len(),
            n
        )));
    }
    if spec.chol.len() != n || spec.chol.iter().any(|row| row.len() != n) {
        return Err(RiskError::DimensionMismatch(format!(
            "Cholesky factor must be {n}x{n}"
        )));
    }
    if spec.days == 0 || spec.n_sims == 0 {
        return Err(RiskError::Validation(
            "days and nSims must both be at least 1".to_string(),
        ));
    }
    if spec.use_student_t && spec.dof == 0 {
        return Err(RiskError::Validation(
            "dof must be at least 1 when useStudentT is set".to_string(),
        ));
    }

    let cells = spec
        .n_sims
        .checked_mul(spec.days + 1)
        .and_then(|v| v.checked_mul(n))
        .ok_or_else(|| RiskError::Validation("ensemble size overflows".to_string()))?;
    if cells > max_cells {
        return Err(RiskError::Validation(format!(
            "ensemble of {cells} price cells exceeds the configured limit of {max_cells}; \
             reduce nSims, days, or the number of positions"
        )));
    }

    let dt = 1.0 / TRADING_DAYS;
    let sqrt_dt = dt.sqrt();
    let drift_step: Vec<f64> = spec
        .mu
        .iter()
        .zip(spec.vol.iter())
        .map(|(m, v)| (m - 0.5 * v * v) * dt)
        .collect();
    let vol_step: Vec<f64> = spec.vol.iter().map(|v| v * sqrt_dt).collect();
    let log_s0: Vec<f64> = spec.s0.iter().map(|s| s.ln()).collect();

    let base_seed = spec.seed.unwrap_or_else(rand::random);

    let paths: Vec<Vec<f64>> = (0..spec.n_sims)
        .into_par_iter()
        .map(|sim| {
            let mut shocks = GaussianShocks::seeded(path_seed(base_seed, sim));
            simulate_single_path(
                &mut shocks,
                &log_s0,
                &drift_step,
                &vol_step,
                spec.chol,
                spec.days,
                spec.use_student_t,
                spec.dof,
            )
        })
        .collect();

    let mut prices = Vec::with_capacity(cells);
    for path in paths {
        prices.extend(path);
    }

    Ok(PriceEnsemble {
        n_sims: spec.n_sims,
        days: spec.days,
        n_assets: n,
        prices,
    })
}

/// One path: chi-square mix first (one scale for the whole path), then
/// day-by-day correlated normal shocks accumulated in log-price space.
#[allow(clippy::too_many_arguments)]
fn simulate_single_path(
    shocks: &mut impl ShockSource,
    log_s0: &[f64],
    drift_step: &[f64],
    vol_step: &[f64],
    chol: &[Vec<f64>],
    days: usize,
    use_student_t: bool,
    dof: u32,
) -> Vec<f64> {
    let n = log_s0.len();

    // Elliptical heavy tails: one mixing draw per path scales every shock of
    // the path, fattening the joint tails without breaking the correlation
    // structure across assets or days.
    let scale = if use_student_t {
        let g = shocks.chi_square(dof) / f64::from(dof);
        1.0 / g.sqrt()
    } else {
        1.0
    };

    let mut out = Vec::with_capacity((days + 1) * n);
    out.extend(log_s0.iter().map(|v| v.exp()));

    let mut log_s = log_s0.to_vec();
    let mut z = vec![0.0_f64; n];
    for _ in 1..=days {
        for zi in z.iter_mut() {
            *zi = shocks.standard_normal();
        }
        for i in 0..n {
            let correlated: f64 = chol[i]
                .iter()
                .zip(z.iter())
                .take(i + 1)
                .map(|(l, zj)| l * zj)
                .sum();
            log_s[i] += drift_step[i] + vol_step[i] * correlated * scale;
            out.push(log_s[i].exp());
        }
    }

    out
}

/// Contracts the price ensemble with position quantities into per-simulation
/// portfolio value series, final PnL, and the visualization sample.
pub fn aggregate_portfolio(ensemble: &PriceEnsemble, qty: &[f64]) -> Result<PortfolioDistribution> {
    if qty.len() != ensemble.n_assets {
        return Err(RiskError::DimensionMismatch(format!(
            "{} position quantities for {} simulated assets",
            qty.len(),
            ensemble.n_assets
        )));
    }

    let n = ensemble.n_assets;
    let days = ensemble.days;

    let pv: Vec<Vec<f64>> = (0..ensemble.n_sims)
        .map(|sim| {
            let path = ensemble.path(sim);
            (0..=days)
                .map(|day| {
                    path[day * n..(day + 1) * n]
                        .iter()
                        .zip(qty.iter())
                        .map(|(p, q)| p * q)
                        .sum()
                })
                .collect()
        })
        .collect();

    let pv0 = pv.iter().map(|row| row[0]).sum::<f64>() / ensemble.n_sims as f64;
    let pnl: Vec<f64> = pv.iter().map(|row| row[days] - row[0]).collect();

    let k = ensemble.n_sims.min(SAMPLE_PATHS_MAX);
    let paths_sample = sample_indices(ensemble.n_sims, k)
        .into_iter()
        .map(|idx| pv[idx][1..].to_vec())
        .collect();

    Ok(PortfolioDistribution {
        pv0,
        pnl,
        paths_sample,
    })
}

/// `k` indices evenly spaced over `[0, n-1]` inclusive, by linear
/// interpolation with truncation toward zero.
fn sample_indices(n: usize, k: usize) -> Vec<usize> {
    if k <= 1 {
        return vec![0];
    }
    (0..k)
        .map(|i| (i as f64 * (n - 1) as f64 / (k - 1) as f64) as usize)
        .collect()
}
