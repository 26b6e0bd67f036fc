mod calibrate;
mod config;
mod error;
mod marketdata;
mod rng;
mod risk;
mod server;
mod simulate;
mod stabilize;

use clap::Parser;
use marketdata::MarketDataProvider;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Portfolio Monte Carlo risk service: calibrate correlated GBM from price history, simulate, summarize",
    after_help = "EXAMPLES:
    # Serve the API on the default port with synthetic demo data
    cargo run --release

    # Serve on a different port against live market data
    cargo run --release -- --port 9000 --live

ENVIRONMENT:
    DEMO_MODE            \"true\" (default) for synthetic data, \"false\" for live
    ALLOW_ORIGINS        comma-separated CORS origins, or \"*\"
    MAX_ENSEMBLE_CELLS   resource guard on nSims*(days+1)*assets"
)]
struct Args {
    /// API server port
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Use live market data instead of the deterministic demo provider
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("portfolio_mc=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    let provider = if args.live || !config::demo_mode_from_env() {
        MarketDataProvider::Live
    } else {
        MarketDataProvider::Demo
    };
    let allow_origins = config::allow_origins_from_env();
    let max_ensemble_cells = config::max_ensemble_cells();

    if let Err(e) = server::run_server(args.port, provider, max_ensemble_cells, &allow_origins).await
    {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}
