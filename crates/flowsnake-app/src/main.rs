//! Headless Flow Snake runner: steps the simulation at a fixed cadence and
//! logs per-epoch progress. Environment knobs keep the binary scriptable:
//! `FLOWSNAKE_NODES`, `FLOWSNAKE_SEED`, `FLOWSNAKE_EPOCHS`, `FLOWSNAKE_FPS`.

use anyhow::{Context, Result};
use flowsnake_core::{FlowSnakeConfig, SimulationState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .map_err(|_| anyhow::anyhow!("{key}={raw} is not a valid value"))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn main() -> Result<()> {
    init_tracing();

    let mut config = FlowSnakeConfig::default();
    if let Some(nodes) = env_parse::<usize>("FLOWSNAKE_NODES")? {
        config.node_count = nodes;
    }
    if let Some(seed) = env_parse::<u32>("FLOWSNAKE_SEED")? {
        config.rng_seed = Some(seed);
    }
    let epochs: u64 = env_parse("FLOWSNAKE_EPOCHS")?.unwrap_or(1);
    let fps: f32 = env_parse("FLOWSNAKE_FPS")?.unwrap_or(60.0);
    anyhow::ensure!(fps > 0.0, "FLOWSNAKE_FPS must be positive");
    let dt = 1.0 / fps;

    let mut sim = SimulationState::new(config).context("building simulation")?;
    info!(
        nodes = sim.config().node_count,
        splits = sim.config().grid_splits,
        slot_budget = sim.config().slot_budget,
        epochs,
        "flow snake starting"
    );

    let started = std::time::Instant::now();
    let mut frames_this_epoch: u64 = 0;
    while sim.epoch() < epochs {
        let events = sim.update(dt);
        frames_this_epoch += 1;

        if events.endgame_started {
            let stats = sim.last_rebuild();
            info!(
                epoch = sim.epoch(),
                frames = frames_this_epoch,
                dropped = stats.dropped,
                skipped = stats.skipped_outside,
                "last node standing, explosion begins"
            );
        }
        if events.epoch_rolled {
            info!(epoch = sim.epoch(), "epoch rolled, nodes rescattered");
            frames_this_epoch = 0;
        }
        if events.frame.0.is_multiple_of(600) {
            info!(
                frame = events.frame.0,
                active = sim.active_count(),
                chomps = events.chomps,
                "progress"
            );
        }
        // A stalled epoch indicates a degenerate configuration; bail rather
        // than spin forever.
        if frames_this_epoch > 10_000_000 {
            warn!(
                epoch = sim.epoch(),
                active = sim.active_count(),
                "epoch failed to converge, stopping"
            );
            break;
        }
    }

    info!(
        frames = sim.frame().0,
        elapsed_ms = started.elapsed().as_millis() as u64,
        epochs = sim.epoch(),
        "run complete"
    );
    Ok(())
}
