//! Risk summary statistics over a simulated PnL distribution.

use serde::Serialize;

use crate::error::{Result, RiskError};

/// Scalar risk statistics. VaR95 is the 5th percentile of the PnL
/// distribution itself (a low, usually negative number), not a positive
/// loss amount.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RiskSummary {
    pub mean: f64,
    pub stdev: f64,
    #[serde(rename = "VaR95")]
    pub var95: f64,
    #[serde(rename = "ES95")]
    pub es95: f64,
    #[serde(rename = "probLoss")]
    pub prob_loss: f64,
}

/// Pure reduction of the PnL vector.
///
/// Sample standard deviation uses the N−1 denominator; with a single path it
/// is reported as 0.0 rather than NaN. ES95 averages every outcome at or
/// below VaR95 and falls back to VaR95 itself if ties/discretization leave
/// the tail empty.
pub fn summarize_pnl(pnl: &[f64]) -> Result<RiskSummary> {
    if pnl.is_empty() {
        return Err(RiskError::Validation(
            "PnL distribution is empty".to_string(),
        ));
    }

    let n = pnl.len() as f64;
    let mean = pnl.iter().sum::<f64>() / n;
    let stdev = if pnl.len() < 2 {
        0.0
    } else {
        (pnl.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    };

    let var95 = percentile(pnl, 5.0);
    let tail: Vec<f64> = pnl.iter().copied().filter(|&v| v <= var95).collect();
    let es95 = if tail.is_empty() {
        var95
    } else {
        tail.iter().sum::<f64>() / tail.len() as f64
    };

    let prob_loss = pnl.iter().filter(|&&v| v < 0.0).count() as f64 / n;

    Ok(RiskSummary {
        mean,
        stdev,
        var95,
        es95,
        prob_loss,
    })
}

/// Linearly interpolated percentile over `[min, max]`, `pct` in [0, 100].
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_interpolates_linearly() {
        let values: Vec<f64> = (0..=100).map(f64::from).collect();
        assert!((percentile(&values, 5.0) - 5.0).abs() < 1e-12);
        assert!((percentile(&values, 50.0) - 50.0).abs() < 1e-12);

        // rank = 0.05 * 3 = 0.15 between 1.0 and 2.0.
        let small = vec![4.0, 2.0, 3.0, 1.0];
        assert!((percentile(&small, 5.0) - 1.15).abs() < 1e-12);
        assert_eq!(percentile(&small, 0.0), 1.0);
        assert_eq!(percentile(&small, 100.0), 4.0);
    }

    #[test]
    fn tail_ordering_on_left_skewed_distribution() {
        let mut pnl: Vec<f64> = (0..95).map(|i| 1.0 + i as f64 * 0.1).collect();
        pnl.extend([-200.0, -150.0, -120.0, -80.0, -60.0]);

        let s = summarize_pnl(&pnl).unwrap();
        assert!(s.es95 <= s.var95);
        assert!(s.var95 <= s.mean);
        assert!(s.stdev > 0.0);
        assert!((s.prob_loss - 0.05).abs() < 1e-12);
    }

    #[test]
    fn constant_distribution_collapses_to_point_statistics() {
        let pnl = vec![5.0; 10];
        let s = summarize_pnl(&pnl).unwrap();
        assert_eq!(s.mean, 5.0);
        assert_eq!(s.stdev, 0.0);
        assert_eq!(s.var95, 5.0);
        assert_eq!(s.es95, 5.0);
        assert_eq!(s.prob_loss, 0.0);
    }

    #[test]
    fn zero_pnl_degenerate_case() {
        let pnl = vec![0.0; 10];
        let s = summarize_pnl(&pnl).unwrap();
        assert_eq!(s.mean, 0.0);
        assert_eq!(s.stdev, 0.0);
        assert_eq!(s.var95, 0.0);
        assert_eq!(s.es95, 0.0);
        assert_eq!(s.prob_loss, 0.0);
    }

    #[test]
    fn single_path_has_zero_stdev() {
        let s = summarize_pnl(&[42.0]).unwrap();
        assert_eq!(s.mean, 42.0);
        assert_eq!(s.stdev, 0.0);
        assert_eq!(s.var95, 42.0);
    }

    #[test]
    fn empty_distribution_is_rejected() {
        assert!(matches!(
            summarize_pnl(&[]),
            Err(RiskError::Validation(_))
        ));
    }

    #[test]
    fn serialized_field_names_match_the_wire_contract() {
        let s = summarize_pnl(&[1.0, -1.0]).unwrap();
        let json = serde_json::to_value(s).unwrap();
        for key in ["mean", "stdev", "VaR95", "ES95", "probLoss"] {
            assert!(json.get(key).is_some(), "missing key {key}");
        }
    }
}
