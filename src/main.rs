mod backend;
mod catalog;
mod config;
mod dashboard;
mod radar;
mod ranking;
mod simulator;
mod utils;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use crate::{
    backend::SqliteBackend, catalog::default_catalog, config::Settings, radar::RadarCache,
    ranking::RankingService, simulator::Simulator,
};

#[derive(Debug, Parser)]
#[command(name = "botradar", version)]
struct Cli {
    /// Override RUN_MODE (live|rank)
    #[arg(long)]
    mode: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(m) = cli.mode {
        settings.run_mode = m.to_lowercase();
    }

    let backend = SqliteBackend::new(&settings.sqlite_path, settings.feed_channel_capacity)?;
    backend.init_db()?;

    let catalog = default_catalog();
    let ranking = Arc::new(RankingService::new(
        Arc::new(backend.clone()),
        catalog.clone(),
        settings.rank_on_rounded,
    ));

    log::info!(
        "app.start run_mode={} sqlite={} bots={}",
        settings.run_mode,
        backend.path(),
        catalog.len()
    );

    // One-shot reconciliation: print the ranked catalog and exit.
    if settings.run_mode == "rank" {
        let ranked = ranking.rankings();
        println!("{}", serde_json::to_string_pretty(&ranked)?);
        return Ok(());
    }

    let radar = RadarCache::new(Arc::new(backend.clone()));
    radar.start();

    if settings.dashboard_enabled {
        let st = settings.clone();
        let radar_dash = radar.clone();
        let ranking_dash = ranking.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve_dashboard(st, radar_dash, ranking_dash).await {
                log::error!("dashboard.error {e:#}");
            }
        });
    }

    if settings.sim_enabled {
        let sim = Simulator::new(settings.clone(), backend.clone(), catalog);
        tokio::spawn(async move {
            if let Err(e) = sim.run().await {
                log::error!("sim.error {e:#}");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    radar.stop();
    log::info!("app.stop");
    Ok(())
}
