use anyhow::Context;
use log::info;
use std::sync::Arc;

use timetable_engine::server::{self, AppState};
use timetable_engine::{
    Config, DisabledSolver, HttpSolverClient, LocalRepository, ScheduleSolver, Seed,
    TimetableGenerator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    let repository = match &config.seed_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed file {}", path.display()))?;
            let seed: Seed = serde_json::from_str(&raw)
                .with_context(|| format!("parsing seed file {}", path.display()))?;
            info!(
                "Loaded {} periods, {} teaching assignments and {} time slots from {}",
                seed.periods.len(),
                seed.teaching_assignments.len(),
                seed.time_slots.len(),
                path.display()
            );
            LocalRepository::from_seed(seed)
        }
        None => LocalRepository::new(),
    };

    let solver: Arc<dyn ScheduleSolver> = match &config.scheduler_url {
        Some(url) => {
            let client = HttpSolverClient::new(url, config.scheduler_timeout)
                .context("building solver HTTP client")?;
            info!(
                "External solver at {} (timeout {:?})",
                client.endpoint(),
                config.scheduler_timeout
            );
            Arc::new(client)
        }
        None => {
            info!("External solver disabled; every run uses the fallback packer");
            Arc::new(DisabledSolver)
        }
    };

    let generator = TimetableGenerator::new(Arc::new(repository), solver);
    server::run_server(config.bind, AppState { generator }).await?;

    Ok(())
}
