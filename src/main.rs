// src/main.rs
mod api;
mod config;
mod controller;
mod export;
mod geometry;
mod input;
mod model;
mod physics;
mod planner;
mod sampler;
mod sequencer;
mod simulation;
mod types;

use std::process::ExitCode;
use std::sync::Arc;

use config::AppConfig;
use model::Container;
use simulation::SimulationCommand;

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_result = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = dotenv_result {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            log::warn!("⚠️ Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();
    log::info!("🚀 Aggregate packer starting...");

    let classes = match input::load_aggregate_classes(app_config.input.csv_path()) {
        Ok(classes) => classes,
        Err(err) => {
            log::error!("❌ Could not load aggregate classes: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let container = match Container::new(app_config.simulation.container()) {
        Ok(container) => container,
        Err(err) => {
            log::error!("❌ Invalid container: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let plan = planner::plan(classes, container);
    match plan.total_volume() {
        Some(volume) => log::info!(
            "🎯 Target fill volume {:.3} ({:.1}% of the container)",
            volume,
            volume / container.volume() * 100.0
        ),
        None => log::warn!(
            "⚠️ No class defines a fill volume ({} of {} excluded), nothing will spawn",
            plan.excluded().len(),
            plan.classes().len()
        ),
    }
    let (simulation, simulation_thread) =
        match simulation::spawn_simulation(plan.clone(), app_config.simulation.settings()) {
            Ok(started) => started,
            Err(err) => {
                log::error!("❌ Could not start the simulation: {}", err);
                return ExitCode::FAILURE;
            }
        };

    let state = api::ApiState::new(simulation.clone(), Arc::new(plan));
    let served = api::start_api_server(app_config.api.clone(), state).await;

    let _ = simulation.send(SimulationCommand::Shutdown);
    if simulation_thread.join().is_err() {
        log::error!("❌ Simulation thread panicked");
    }

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("❌ API server terminated with an error: {}", err);
            ExitCode::FAILURE
        }
    }
}
