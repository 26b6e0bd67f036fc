use rayon::ThreadPoolBuilder;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub const APP_TITLE: &str = "Portfolio Monte Carlo Simulator";

/// Annual trading days used for annualization (mean ×252, stdev ×√252).
pub const TRADING_DAYS: f64 = 252.0;

/// Simulation request defaults, mirrored by the serde defaults on the wire.
pub const DEFAULT_DAYS: usize = 20;
pub const DEFAULT_N_SIMS: usize = 5000;
pub const DEFAULT_DOF: u32 = 6;

/// Maximum number of portfolio-value paths returned for visualization.
pub const SAMPLE_PATHS_MAX: usize = 500;

/// Upper bound on nSims·(days+1)·assets before a simulate request is refused.
/// The full price ensemble is materialized in memory, so this is the resource
/// guard against runaway requests. Override with MAX_ENSEMBLE_CELLS.
pub const DEFAULT_MAX_ENSEMBLE_CELLS: usize = 100_000_000;

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// DEMO_MODE env flag. Unset, empty, or "true" selects the synthetic
/// provider, so the service runs without market-data entitlements.
pub fn demo_mode_from_env() -> bool {
    parse_demo_mode(std::env::var("DEMO_MODE").ok().as_deref())
}

fn parse_demo_mode(value: Option<&str>) -> bool {
    match value {
        Some(v) => v.trim().eq_ignore_ascii_case("true") || v.trim().is_empty(),
        None => true,
    }
}

pub fn allow_origins_from_env() -> Vec<String> {
    let raw = std::env::var("ALLOW_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:5173,http://127.0.0.1:5173".to_string());
    parse_allow_origins(&raw)
}

fn parse_allow_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn max_ensemble_cells() -> usize {
    std::env::var("MAX_ENSEMBLE_CELLS")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_MAX_ENSEMBLE_CELLS)
}
