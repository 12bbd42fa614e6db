use abp_common::{Placement, SimulationConfig, Snapshot, Vec2};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::ensemble::{Ensemble, Visibility};
use crate::integrator::HeunIntegrator;
use crate::noise::ChannelNoise;

const MAX_EXPECTED_NEIGHBORS: usize = 64; // Histogram size; larger counts land in the last bin

/// Runs an active Brownian ensemble through its relaxation and observation phases.
pub struct Simulation {
    /// The configuration the run was built from.
    pub config: SimulationConfig,
    ensemble: Ensemble,
    /// Heun scheme owning the per-channel noise streams.
    integrator: HeunIntegrator<ChannelNoise>,
    /// Completed observation ticks.
    observation_tick: u64,
    /// Positions are appended here every `log_interval` observation ticks.
    trajectory: Option<BufWriter<File>>,
    recorded_snapshots: Vec<Snapshot>,
}

impl Simulation {
    /// Builds and seeds the ensemble described by `config`.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let model = &config.model;
        let ic = &config.initial_conditions;

        let visibility = if model.local_visibility {
            Visibility::Local
        } else {
            Visibility::Global
        };
        let mut ensemble = Ensemble::new(
            model.number_of_particles,
            model.rectangle_size,
            visibility,
            model.epsilon,
            model.use_grid,
        )
        .context("Failed to build the ensemble")?;

        let mut noise = ChannelNoise::seed_from_u64(ic.seed);
        match ic.placement {
            Placement::Clustered => {
                ensemble.seed_clustered(&mut noise, ic.speed_lowest, ic.speed_highest)
            }
            Placement::Uniform => ensemble.seed_uniform(&mut noise, ic.speed_lowest, ic.speed_highest),
        }
        info!(
            "Seeded {} particles ({:?} placement, seed {}).",
            ensemble.len(),
            ic.placement,
            ic.seed
        );

        let params = config.get_model_params();
        debug!("Model parameters: {:#?}", params);
        let integrator = HeunIntegrator::new(params, noise);

        Ok(Self {
            config,
            ensemble,
            integrator,
            observation_tick: 0,
            trajectory: None,
            recorded_snapshots: Vec::new(),
        })
    }

    /// Opens (truncating) the trajectory log that observation ticks append to.
    pub fn open_trajectory<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let file = File::create(path_ref)
            .with_context(|| format!("Failed to create trajectory file '{}'", path_ref.display()))?;
        self.trajectory = Some(BufWriter::new(file));
        info!("Logging trajectory to {}", path_ref.display());
        Ok(())
    }

    /// One relaxation tick: nothing is measured or recorded.
    pub fn relax_step(&mut self) -> Result<()> {
        self.ensemble.step(&mut self.integrator)?;
        Ok(())
    }

    /// Ends relaxation: the speed measurement starts with the next tick.
    pub fn start_observation(&mut self) {
        self.ensemble.start_speed_measurement();
        info!(
            "Relaxation done after {} ticks, average speed {:.6}.",
            self.ensemble.ticks(),
            self.ensemble.average_speed()
        );
    }

    /// Runs every configured relaxation tick, then starts the observation phase.
    pub fn relax(&mut self) -> Result<()> {
        for _ in 0..self.config.integration.relaxation_iterations {
            self.relax_step()?;
        }
        self.start_observation();
        Ok(())
    }

    /// One observation tick. Every `log_interval` ticks the positions are
    /// appended to the trajectory log and a snapshot is recorded; returns
    /// whether this tick was such a tick.
    pub fn observe_step(&mut self) -> Result<bool> {
        self.ensemble.step(&mut self.integrator)?;
        self.observation_tick += 1;

        if self.observation_tick % self.config.output.log_interval != 0 {
            return Ok(false);
        }
        if let Some(writer) = self.trajectory.as_mut() {
            write_positions(writer, self.ensemble.positions())
                .context("Failed to append to trajectory log")?;
        }
        self.record_snapshot();
        Ok(true)
    }

    /// Runs every configured observation tick.
    pub fn observe(&mut self) -> Result<()> {
        for _ in 0..self.config.integration.observation_iterations {
            self.observe_step()?;
        }
        Ok(())
    }

    /// Collects the observables of the current generation as a Snapshot.
    pub fn record_snapshot(&mut self) {
        let snapshot = Snapshot {
            iteration: self.observation_tick,
            time: self.observation_tick as f64 * self.config.integration.time_step,
            particle_count: self.ensemble.len(),
            average_speed: self.ensemble.average_speed(),
            measurement: self.ensemble.measurement(),
            neighbor_counts_distribution: self.neighbor_histogram(),
            positions: if self.config.output.positions_in_snapshot {
                Some(self.final_positions())
            } else {
                None
            },
        };
        debug!(
            "Snapshot at observation tick {}: average speed {:.6}, measurement {:?}",
            snapshot.iteration, snapshot.average_speed, snapshot.measurement
        );
        self.recorded_snapshots.push(snapshot);
    }

    /// Histogram of the neighborhood sizes seen on the last tick; empty with global visibility.
    fn neighbor_histogram(&self) -> Vec<u32> {
        if self.ensemble.visibility() == Visibility::Global {
            return Vec::new();
        }
        let mut distribution = vec![0u32; MAX_EXPECTED_NEIGHBORS];
        let mut overflow = 0;
        let mut total_neighbors = 0;
        let mut max_neighbors = 0;
        for &count in self.ensemble.neighbor_counts() {
            total_neighbors += count;
            max_neighbors = max_neighbors.max(count);
            if count < MAX_EXPECTED_NEIGHBORS {
                distribution[count] += 1;
            } else {
                distribution[MAX_EXPECTED_NEIGHBORS - 1] += 1;
                overflow += 1;
            }
        }
        if overflow > 0 {
            warn!(
                "{} particles have more than {} neighbors; counted in the last bin.",
                overflow,
                MAX_EXPECTED_NEIGHBORS - 1
            );
        }
        debug!(
            "Neighbor stats: avg_neighbors={:.2}, max_neighbors={}",
            total_neighbors as f64 / self.ensemble.len() as f64,
            max_neighbors
        );
        distribution
    }

    /// Flushes the trajectory log.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.trajectory.as_mut() {
            writer.flush().context("Failed to flush trajectory log")?;
        }
        Ok(())
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    /// Running speed measurement of the observation phase.
    pub fn measurement(&self) -> Option<f64> {
        self.ensemble.measurement()
    }

    pub fn observation_tick(&self) -> u64 {
        self.observation_tick
    }

    pub fn final_positions(&self) -> Vec<(f64, f64)> {
        self.ensemble.positions().iter().map(|p| (p.x, p.y)).collect()
    }

    /// Provides access to the recorded snapshots.
    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }
}

/// Writes one trajectory line: every particle as `"x y\t"`, then a newline.
pub fn write_positions<W: Write>(out: &mut W, positions: &[Vec2]) -> std::io::Result<()> {
    for p in positions {
        write!(out, "{}\t", p)?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(local: bool, use_grid: bool) -> SimulationConfig {
        let toml = format!(
            r#"
[integration]
relaxation_iterations = 20
observation_iterations = 40
time_step = 0.01

[model]
number_of_particles = 60
rectangle_size = 6.0
local_visibility = {local}
epsilon = 1.0
mu = 2.0
use_grid = {use_grid}

[model.noise_intensities]
passive_noise = 0.05
speed_noise = 0.1
angular_noise = 0.2

[initial_conditions]
placement = "uniform"
seed = 11

[output]
base_filename = "test"
log_interval = 10
"#
        );
        SimulationConfig::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn trajectory_line_format() {
        let mut out = Vec::new();
        write_positions(&mut out, &[Vec2::new(1.0, 2.5), Vec2::new(0.125, 3.0)]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "1.000000 2.500000\t0.125000 3.000000\t\n"
        );
    }

    #[test]
    fn runs_both_phases_and_records_snapshots() {
        let mut sim = Simulation::new(config(true, true)).unwrap();
        sim.relax().unwrap();
        assert_eq!(sim.ensemble().ticks(), 20);
        assert_eq!(sim.measurement(), None);

        sim.observe().unwrap();
        assert_eq!(sim.observation_tick(), 40);
        let snapshots = sim.get_recorded_snapshots();
        assert_eq!(snapshots.len(), 4);
        assert_eq!(snapshots[0].iteration, 10);
        assert_eq!(snapshots[0].neighbor_counts_distribution.len(), MAX_EXPECTED_NEIGHBORS);
        let counted: u32 = snapshots[3].neighbor_counts_distribution.iter().sum();
        assert_eq!(counted, 60);
        assert!(snapshots[3].positions.is_none());

        let m = sim.measurement().unwrap();
        assert!(m.is_finite() && m >= 0.0);
        assert_eq!(snapshots[3].measurement, Some(m));
    }

    #[test]
    fn global_visibility_has_no_histogram() {
        let mut sim = Simulation::new(config(false, false)).unwrap();
        sim.relax().unwrap();
        sim.observe().unwrap();
        assert!(sim
            .get_recorded_snapshots()
            .iter()
            .all(|s| s.neighbor_counts_distribution.is_empty()));
    }

    #[test]
    fn same_seed_gives_same_run() {
        let mut a = Simulation::new(config(true, true)).unwrap();
        let mut b = Simulation::new(config(true, true)).unwrap();
        for _ in 0..15 {
            a.relax_step().unwrap();
            b.relax_step().unwrap();
        }
        assert_eq!(a.final_positions(), b.final_positions());
    }

    #[test]
    fn grid_and_brute_force_runs_agree() {
        let mut grid = Simulation::new(config(true, true)).unwrap();
        let mut brute = Simulation::new(config(true, false)).unwrap();
        for _ in 0..10 {
            grid.relax_step().unwrap();
            brute.relax_step().unwrap();
        }
        for (a, b) in grid.final_positions().iter().zip(brute.final_positions()) {
            assert!((a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9);
        }
    }

    #[test]
    fn trajectory_gets_one_line_per_logged_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trajectory.txt");
        let mut sim = Simulation::new(config(true, true)).unwrap();
        sim.open_trajectory(&path).unwrap();
        sim.relax().unwrap();
        sim.observe().unwrap();
        sim.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.split('\t').filter(|s| !s.is_empty()).count() == 60));
    }
}
