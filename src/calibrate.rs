//! Calibration engine: turns aligned daily log-returns into annualized
//! drift/volatility per asset and a Pearson correlation matrix.

use crate::config::TRADING_DAYS;
use crate::error::{Result, RiskError};

/// A daily standard deviation below this is treated as zero variance: the
/// Pearson correlation for that asset would be undefined.
const MIN_DAILY_STDEV: f64 = 1e-12;

/// T×N matrix of aligned daily log-returns (rows = days, columns = assets).
/// The constructor enforces rectangularity; alignment and forward-fill happen
/// upstream in the market-data layer.
#[derive(Clone, Debug)]
pub struct ReturnSeries {
    n_assets: usize,
    rows: Vec<Vec<f64>>,
}

impl ReturnSeries {
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_assets = rows
            .first()
            .map(Vec::len)
            .ok_or_else(|| RiskError::InsufficientData("return series has no rows".to_string()))?;
        if n_assets == 0 {
            return Err(RiskError::InsufficientData(
                "return series has no assets".to_string(),
            ));
        }
        if rows.iter().any(|r| r.len() != n_assets) {
            return Err(RiskError::DimensionMismatch(
                "return series rows have inconsistent widths".to_string(),
            ));
        }
        Ok(Self { n_assets, rows })
    }

    pub fn n_assets(&self) -> usize {
        self.n_assets
    }

    pub fn n_obs(&self) -> usize {
        self.rows.len()
    }

    fn column(&self, j: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |r| r[j])
    }
}

/// Annualized per-asset parameters plus the cross-asset correlation matrix.
/// Immutable once derived; the simulator consumes it read-only.
#[derive(Clone, Debug)]
pub struct Calibration {
    pub mu: Vec<f64>,
    pub vol: Vec<f64>,
    pub corr: Vec<Vec<f64>>,
}

/// Pure function of the return series: `mu = mean·252`,
/// `vol = stdev(N−1)·√252`, `corr` = Pearson correlation of the columns.
///
/// A zero-variance column surfaces as `InsufficientData` rather than letting
/// NaN leak into the correlation matrix.
pub fn calibrate(returns: &ReturnSeries) -> Result<Calibration> {
    let t = returns.n_obs();
    if t < 2 {
        return Err(RiskError::InsufficientData(format!(
            "need at least 2 return observations, got {t}"
        )));
    }

    let n = returns.n_assets();
    let t_f = t as f64;

    let means: Vec<f64> = (0..n)
        .map(|j| returns.column(j).sum::<f64>() / t_f)
        .collect();

    let daily_stdev: Vec<f64> = (0..n)
        .map(|j| {
            let variance = returns
                .column(j)
                .map(|v| (v - means[j]).powi(2))
                .sum::<f64>()
                / (t_f - 1.0);
            variance.sqrt()
        })
        .collect();

    for (j, sd) in daily_stdev.iter().enumerate() {
        if !sd.is_finite() || *sd < MIN_DAILY_STDEV {
            return Err(RiskError::InsufficientData(format!(
                "asset column {j} has zero variance; correlation is undefined"
            )));
        }
    }

    let mut corr = vec![vec![0.0; n]; n];
    for i in 0..n {
        corr[i][i] = 1.0;
        for j in (i + 1)..n {
            let cov = returns
                .rows
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum::<f64>()
                / (t_f - 1.0);
            let rho = (cov / (daily_stdev[i] * daily_stdev[j])).clamp(-1.0, 1.0);
            corr[i][j] = rho;
            corr[j][i] = rho;
        }
    }

    let mu = means.iter().map(|m| m * TRADING_DAYS).collect();
    let vol = daily_stdev.iter().map(|sd| sd * TRADING_DAYS.sqrt()).collect();

    Ok(Calibration { mu, vol, corr })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(rows: Vec<Vec<f64>>) -> ReturnSeries {
        ReturnSeries::new(rows).expect("valid series")
    }

    #[test]
    fn annualization_matches_hand_computation() {
        let cal = calibrate(&series(vec![vec![0.01], vec![0.03]])).unwrap();
        // mean 0.02 daily, stdev sqrt(2)*0.01 daily (N-1 denominator).
        assert!((cal.mu[0] - 0.02 * 252.0).abs() < 1e-12);
        let expected_vol = (0.0002_f64 / 1.0).sqrt() * 252.0_f64.sqrt();
        assert!((cal.vol[0] - expected_vol).abs() < 1e-12);
        assert_eq!(cal.corr, vec![vec![1.0]]);
    }

    #[test]
    fn single_asset_correlation_is_identity() {
        let cal = calibrate(&series(vec![vec![0.01], vec![-0.02], vec![0.005]])).unwrap();
        assert_eq!(cal.corr.len(), 1);
        assert_eq!(cal.corr[0][0], 1.0);
    }

    #[test]
    fn perfectly_correlated_columns() {
        let rows = vec![vec![0.01, 0.02], vec![-0.01, -0.02], vec![0.02, 0.04]];
        let cal = calibrate(&series(rows)).unwrap();
        assert!((cal.corr[0][1] - 1.0).abs() < 1e-12);

        let rows = vec![vec![0.01, -0.02], vec![-0.01, 0.02], vec![0.02, -0.04]];
        let cal = calibrate(&series(rows)).unwrap();
        assert!((cal.corr[0][1] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_variance_column_is_a_calibration_failure() {
        let rows = vec![vec![0.01, 0.0], vec![0.02, 0.0], vec![-0.01, 0.0]];
        let err = calibrate(&series(rows)).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData(_)));
    }

    #[test]
    fn too_few_observations_fail() {
        let err = calibrate(&series(vec![vec![0.01, 0.02]])).unwrap_err();
        assert!(matches!(err, RiskError::InsufficientData(_)));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = ReturnSeries::new(vec![vec![0.01, 0.02], vec![0.01]]).unwrap_err();
        assert!(matches!(err, RiskError::DimensionMismatch(_)));
    }

    #[test]
    fn permutation_equivariance() {
        let rows = vec![
            vec![0.010, -0.004, 0.021],
            vec![-0.012, 0.008, -0.003],
            vec![0.007, 0.015, 0.004],
            vec![0.001, -0.009, -0.011],
            vec![-0.006, 0.002, 0.018],
        ];
        let base = calibrate(&series(rows.clone())).unwrap();

        // Reorder the asset columns as [2, 0, 1].
        let perm = [2usize, 0, 1];
        let permuted_rows: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| perm.iter().map(|&p| r[p]).collect())
            .collect();
        let permuted = calibrate(&series(permuted_rows)).unwrap();

        for (k, &p) in perm.iter().enumerate() {
            assert!((permuted.mu[k] - base.mu[p]).abs() < 1e-14);
            assert!((permuted.vol[k] - base.vol[p]).abs() < 1e-14);
            for (l, &q) in perm.iter().enumerate() {
                assert!((permuted.corr[k][l] - base.corr[p][q]).abs() < 1e-14);
            }
        }
    }
}
