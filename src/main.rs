use abp_common::{OutputFormat, SimulationConfig, Snapshot};
use abp_engine::Simulation;
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Active Brownian particle simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory the output files are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Overrides `initial_conditions.seed`
    #[arg(long)]
    seed: Option<u64>,

    /// Disable the progress bars
    #[arg(long)]
    no_progress: bool,
}

fn phase_bar(len: u64, label: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    let template = format!(
        "[{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {} ({{percent}}%) [{{eta}}] {{msg}}",
        label
    );
    match ProgressStyle::default_bar().template(&template) {
        Ok(style) => bar.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("Invalid progress bar template: {}", e),
    }
    bar
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting active Brownian particle simulation...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        info!("Overriding seed {} with {}.", config.initial_conditions.seed, seed);
        config.initial_conditions.seed = seed;
    }
    fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory '{}'", args.output_dir.display())
    })?;
    let base = args.output_dir.join(&config.output.base_filename);

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(config)?;
    debug!("Configuration: {:#?}", sim.config);
    if let Some(grid) = sim.ensemble().grid() {
        let (xcells, ycells) = grid.dims();
        info!("Using a {}x{} spatial grid.", xcells, ycells);
    }
    if sim.config.output.save_trajectory {
        sim.open_trajectory(with_suffix(&base, "_trajectory.txt"))?;
    }

    let start_time = Instant::now();

    // --- Relaxation ---
    let relaxation = sim.config.integration.relaxation_iterations;
    info!("Relaxing for {} ticks...", relaxation);
    let bar = phase_bar(relaxation, "relaxation", args.no_progress);
    for tick in 0..relaxation {
        if let Err(e) = sim.relax_step() {
            error!("Error during relaxation tick {}: {}", tick + 1, e);
            anyhow::bail!("Relaxation failed.");
        }
        bar.inc(1);
    }
    bar.finish_with_message("relaxed");
    sim.start_observation();

    // --- Observation ---
    let observation = sim.config.integration.observation_iterations;
    info!("Observing for {} ticks...", observation);
    let bar = phase_bar(observation, "observation", args.no_progress);
    for tick in 0..observation {
        match sim.observe_step() {
            Ok(true) => bar.set_message(format!("{:.6}", sim.ensemble().average_speed())),
            Ok(false) => {}
            Err(e) => {
                error!("Error during observation tick {}: {}", tick + 1, e);
                anyhow::bail!("Observation failed.");
            }
        }
        bar.inc(1);
    }
    bar.finish_with_message("observed");
    sim.finish()?;

    let total_duration = start_time.elapsed();
    info!(
        "Simulation finished in {:.3} seconds ({} ticks).",
        total_duration.as_secs_f64(),
        sim.ensemble().ticks()
    );
    match sim.measurement() {
        Some(m) => info!("Speed measurement: {:.6}", m),
        None => warn!("No observation ticks ran; there is no speed measurement."),
    }

    // --- Save Recorded Data ---
    if sim.config.output.save_stats {
        let filename = save_snapshots(&base, sim.config.output.format, sim.get_recorded_snapshots())?;
        info!(
            "{} snapshots saved to {}",
            sim.get_recorded_snapshots().len(),
            filename.display()
        );
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    if sim.config.output.save_final_positions {
        let filename = with_suffix(&base, "_final_positions.csv");
        let mut writer = csv::Writer::from_path(&filename)
            .with_context(|| format!("Failed to create '{}'", filename.display()))?;
        writer.write_record(["x", "y"])?;
        for (x, y) in sim.final_positions() {
            writer.write_record(&[format!("{:.6}", x), format!("{:.6}", y)])?;
        }
        writer.flush()?;
        info!("Final positions saved to {}", filename.display());
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes the snapshots in the configured format and returns the file written.
fn save_snapshots(base: &Path, format: OutputFormat, snapshots: &[Snapshot]) -> Result<PathBuf> {
    let filename = match format {
        OutputFormat::Json => with_suffix(base, "_snapshots.json"),
        OutputFormat::Bincode => with_suffix(base, "_snapshots.bin"),
        OutputFormat::Messagepack => with_suffix(base, "_snapshots.msgpack"),
    };
    let mut file = File::create(&filename)
        .with_context(|| format!("Failed to create snapshot file '{}'", filename.display()))?;
    match format {
        OutputFormat::Json => serde_json::to_writer(&mut file, snapshots)
            .context("Error serializing snapshots to JSON")?,
        OutputFormat::Bincode => bincode::serialize_into(&mut file, snapshots)
            .context("Error serializing snapshots to bincode")?,
        OutputFormat::Messagepack => rmp_serde::encode::write(&mut file, snapshots)
            .context("Error serializing snapshots to MessagePack")?,
    }
    Ok(filename)
}
