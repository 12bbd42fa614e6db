//! N active Brownian particles on a periodic square, advanced one tick at a time.

use abp_common::Vec2;
use log::{debug, trace, warn};

use crate::error::SimError;
use crate::grid::SpatialGrid;
use crate::integrator::Integrator;
use crate::neighbors::{brute_force_disc_mean, global_mean};
use crate::noise::{NoiseChannel, NoiseSource};
use crate::state::EnsembleState;

/// Grid cells per visibility radius along each axis.
const GRID_CELLS_PER_RADIUS: f64 = 5.0;
/// Total grid cells allowed per particle, for radii tiny compared to the domain.
const MAX_GRID_CELLS_PER_PARTICLE: usize = 16;
/// Cell budget never drops below this, so small ensembles still get a useful grid.
const MIN_GRID_CELL_BUDGET: usize = 64 * 64;
/// Inset of the uniform seeding rectangle from the domain edges.
const UNIFORM_SEED_MARGIN: f64 = 0.01;

/// Which particles influence a particle's velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Every particle sees the mean velocity of the whole ensemble.
    Global,
    /// A particle sees only the particles within the visibility radius.
    Local,
}

/// How neighborhood means are computed, fixed at construction.
enum NeighborModel {
    Global,
    LocalBruteForce,
    LocalGrid(Box<SpatialGrid>),
}

#[derive(Debug, Clone, Copy, Default)]
struct SpeedMeasurement {
    sum: f64,
    samples: u64,
}

pub struct Ensemble {
    num_particles: usize,
    domain_size: f64,
    visibility: Visibility,
    radius: f64,
    model: NeighborModel,
    state: EnsembleState,
    /// Per-tick cache of each particle's neighborhood mean velocity.
    neighborhood_means: Vec<Vec2>,
    /// Per-tick cache of each particle's neighborhood size.
    neighbor_counts: Vec<usize>,
    seeded: bool,
    /// The grid still holds the previous generation's positions.
    grid_stale: bool,
    measurement: Option<SpeedMeasurement>,
    ticks: u64,
}

impl Ensemble {
    /// Creates an unseeded ensemble of `num_particles` on the square of side `domain_size`.
    ///
    /// `radius` is only read with [`Visibility::Local`]; `use_grid` then selects
    /// the spatial grid over the all-pairs scan. The grid has
    /// `ceil(5 * domain_size / radius)` cells per axis, capped so the total cell
    /// count stays proportional to `num_particles`. If the disc is too wide for
    /// the grid to be exact (`2 * radius >= domain_size - cell size`), the
    /// all-pairs scan is used instead.
    pub fn new(
        num_particles: usize,
        domain_size: f64,
        visibility: Visibility,
        radius: f64,
        use_grid: bool,
    ) -> Result<Self, SimError> {
        if num_particles == 0 {
            return Err(SimError::invalid("ensemble needs at least one particle"));
        }
        if !(domain_size.is_finite() && domain_size > 0.0) {
            return Err(SimError::invalid(format!(
                "domain size must be positive, got {}",
                domain_size
            )));
        }

        let model = match visibility {
            Visibility::Global => NeighborModel::Global,
            Visibility::Local => {
                if !(radius.is_finite() && radius > 0.0) {
                    return Err(SimError::invalid(format!(
                        "visibility radius must be positive, got {}",
                        radius
                    )));
                }
                if radius >= 0.5 * domain_size {
                    warn!(
                        "Visibility radius {} is at least half the domain {}; neighborhoods may miss periodic copies.",
                        radius, domain_size
                    );
                }
                if !use_grid {
                    NeighborModel::LocalBruteForce
                } else {
                    let cells = grid_cells_per_axis(num_particles, domain_size, radius);
                    if grid_is_exact(domain_size, radius, cells) {
                        let grid = SpatialGrid::new(domain_size, domain_size, cells, cells)?;
                        NeighborModel::LocalGrid(Box::new(grid))
                    } else {
                        warn!(
                            "Visibility radius {} is too wide for a {}x{} grid over {}; using the all-pairs scan.",
                            radius, cells, cells, domain_size
                        );
                        NeighborModel::LocalBruteForce
                    }
                }
            }
        };

        debug!(
            "Ensemble of {} particles on {}x{} ({:?} visibility, radius {}, grid: {}).",
            num_particles,
            domain_size,
            domain_size,
            visibility,
            radius,
            matches!(model, NeighborModel::LocalGrid(_))
        );

        Ok(Self {
            num_particles,
            domain_size,
            visibility,
            radius,
            model,
            state: EnsembleState::new(num_particles),
            neighborhood_means: vec![Vec2::zero(); num_particles],
            neighbor_counts: vec![0; num_particles],
            seeded: false,
            grid_stale: false,
            measurement: None,
            ticks: 0,
        })
    }

    /// Creates an ensemble already seeded with the given positions and velocities.
    ///
    /// Positions are wrapped into the domain.
    pub fn from_state(
        domain_size: f64,
        visibility: Visibility,
        radius: f64,
        use_grid: bool,
        positions: &[Vec2],
        velocities: &[Vec2],
    ) -> Result<Self, SimError> {
        if positions.len() != velocities.len() {
            return Err(SimError::invalid(format!(
                "{} positions but {} velocities",
                positions.len(),
                velocities.len()
            )));
        }
        let mut ensemble = Self::new(positions.len(), domain_size, visibility, radius, use_grid)?;
        let side = ensemble.domain_size;
        for (slot, p) in ensemble.state.positions_in.iter_mut().zip(positions) {
            *slot = p.wrapped(side, side);
        }
        ensemble.state.velocities_in.copy_from_slice(velocities);
        ensemble.finish_seeding();
        Ok(ensemble)
    }

    /// Rebuilds the ensemble from scratch; it must be seeded again before stepping.
    pub fn reinit(
        &mut self,
        num_particles: usize,
        domain_size: f64,
        visibility: Visibility,
        radius: f64,
        use_grid: bool,
    ) -> Result<(), SimError> {
        *self = Self::new(num_particles, domain_size, visibility, radius, use_grid)?;
        Ok(())
    }

    /// Seeds a Gaussian cloud around the domain center (σ = 0.1 L), wrapped into
    /// the domain. Velocity components are Gaussian around the midpoint of
    /// `[speed_lowest, speed_highest]` with σ = a tenth of the range.
    pub fn seed_clustered<N>(&mut self, noise: &mut N, speed_lowest: f64, speed_highest: f64)
    where
        N: NoiseSource + ?Sized,
    {
        let side = self.domain_size;
        let center = 0.5 * side;
        let magnitude = 0.1 * side;
        for p in &mut self.state.positions_in {
            let x = center + noise.gaussian(NoiseChannel::Placement) * magnitude;
            let y = center + noise.gaussian(NoiseChannel::Placement) * magnitude;
            *p = Vec2::new(x, y).wrapped(side, side);
        }

        let mean_speed = 0.5 * (speed_lowest + speed_highest);
        let speed_magnitude = (speed_highest - speed_lowest) / 10.0;
        for v in &mut self.state.velocities_in {
            let vx = mean_speed + noise.gaussian(NoiseChannel::Placement) * speed_magnitude;
            let vy = mean_speed + noise.gaussian(NoiseChannel::Placement) * speed_magnitude;
            *v = Vec2::new(vx, vy);
        }
        self.finish_seeding();
    }

    /// Seeds positions uniformly over `[0.01, L - 0.01]²` and velocity components
    /// uniformly over `[speed_lowest, speed_highest]`.
    pub fn seed_uniform<N>(&mut self, noise: &mut N, speed_lowest: f64, speed_highest: f64)
    where
        N: NoiseSource + ?Sized,
    {
        let side = self.domain_size;
        let span = side - 2.0 * UNIFORM_SEED_MARGIN;
        for p in &mut self.state.positions_in {
            let x = UNIFORM_SEED_MARGIN + noise.uniform(NoiseChannel::Placement) * span;
            let y = UNIFORM_SEED_MARGIN + noise.uniform(NoiseChannel::Placement) * span;
            *p = Vec2::new(x, y).wrapped(side, side);
        }

        let speed_range = speed_highest - speed_lowest;
        for v in &mut self.state.velocities_in {
            let vx = speed_lowest + noise.uniform(NoiseChannel::Placement) * speed_range;
            let vy = speed_lowest + noise.uniform(NoiseChannel::Placement) * speed_range;
            *v = Vec2::new(vx, vy);
        }
        self.finish_seeding();
    }

    fn finish_seeding(&mut self) {
        if let NeighborModel::LocalGrid(grid) = &mut self.model {
            grid.clear();
            grid.sync(&self.state.positions_in);
        }
        self.grid_stale = false;
        self.neighborhood_means.fill(Vec2::zero());
        self.neighbor_counts.fill(0);
        self.seeded = true;
        debug!("Seeded {} particles.", self.num_particles);
    }

    /// Advances the ensemble by one tick.
    ///
    /// Neighborhood means are computed from the current generation for every
    /// particle before anything is written; the integrator's results go to the
    /// next generation, which becomes current at the end of the tick.
    pub fn step<I>(&mut self, integrator: &mut I) -> Result<(), SimError>
    where
        I: Integrator + ?Sized,
    {
        if !self.seeded {
            return Err(SimError::NotSeeded);
        }

        // --- 1. Read phase: neighborhoods of the current generation ---
        self.gather_neighborhoods();
        if let Some(measurement) = &mut self.measurement {
            measurement.sum += global_mean(&self.state.velocities_in).length();
            measurement.samples += 1;
        }

        // --- 2. Write phase: next generation only ---
        let side = self.domain_size;
        let state = &mut self.state;
        for i in 0..self.num_particles {
            let r = state.positions_in[i];
            let v = state.velocities_in[i];
            state.positions_out[i] = integrator.position_step(r, v).wrapped(side, side);
            state.velocities_out[i] = integrator.velocity_step(v, self.neighborhood_means[i]);
        }

        // --- Swap Buffers: Output becomes Input for next step ---
        self.state.swap_buffers();
        self.grid_stale = true;
        self.ticks += 1;
        trace!("Tick {} done, average speed {:.6}.", self.ticks, self.average_speed());
        Ok(())
    }

    /// Fills the per-tick neighborhood caches from the current generation.
    fn gather_neighborhoods(&mut self) {
        let positions = &self.state.positions_in;
        let velocities = &self.state.velocities_in;
        match &mut self.model {
            NeighborModel::Global => {
                let mean = global_mean(velocities);
                self.neighborhood_means.fill(mean);
                self.neighbor_counts.fill(self.num_particles - 1);
            }
            NeighborModel::LocalBruteForce => {
                for i in 0..self.num_particles {
                    let found =
                        brute_force_disc_mean(i, positions, velocities, self.domain_size, self.radius);
                    self.neighborhood_means[i] = found.mean;
                    self.neighbor_counts[i] = found.count;
                }
            }
            NeighborModel::LocalGrid(grid) => {
                if self.grid_stale {
                    grid.sync(positions);
                    self.grid_stale = false;
                }
                for i in 0..self.num_particles {
                    let found = grid.query_disc_mean_velocity(i, self.radius, velocities);
                    self.neighborhood_means[i] = found.mean;
                    self.neighbor_counts[i] = found.count;
                }
            }
        }
    }

    /// Starts averaging the order parameter over the following ticks.
    pub fn start_speed_measurement(&mut self) {
        self.measurement = Some(SpeedMeasurement::default());
    }

    /// Running mean of the order parameter since [`start_speed_measurement`](Self::start_speed_measurement),
    /// or `None` if no tick has been measured yet.
    pub fn measurement(&self) -> Option<f64> {
        self.measurement
            .filter(|m| m.samples > 0)
            .map(|m| m.sum / m.samples as f64)
    }

    /// Current generation positions.
    pub fn positions(&self) -> &[Vec2] {
        &self.state.positions_in
    }

    /// Current generation velocities.
    pub fn velocities(&self) -> &[Vec2] {
        &self.state.velocities_in
    }

    pub fn mean_velocity(&self) -> Vec2 {
        global_mean(&self.state.velocities_in)
    }

    /// Magnitude of the mean velocity: the order parameter.
    pub fn average_speed(&self) -> f64 {
        self.mean_velocity().length()
    }

    /// Neighborhood mean supplied to each particle on the last tick.
    pub fn neighborhood_means(&self) -> &[Vec2] {
        &self.neighborhood_means
    }

    /// Neighborhood size of each particle on the last tick.
    pub fn neighbor_counts(&self) -> &[usize] {
        &self.neighbor_counts
    }

    /// The spatial grid, when local visibility runs on one.
    pub fn grid(&self) -> Option<&SpatialGrid> {
        match &self.model {
            NeighborModel::LocalGrid(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.num_particles
    }

    pub fn is_empty(&self) -> bool {
        self.num_particles == 0
    }

    pub fn domain_size(&self) -> f64 {
        self.domain_size
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn uses_grid(&self) -> bool {
        matches!(self.model, NeighborModel::LocalGrid(_))
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

fn grid_cells_per_axis(num_particles: usize, domain_size: f64, radius: f64) -> usize {
    // `as usize` saturates for huge ratios.
    let wanted = ((GRID_CELLS_PER_RADIUS * domain_size / radius).ceil() as usize).max(1);
    let budget = num_particles
        .saturating_mul(MAX_GRID_CELLS_PER_PARTICLE)
        .max(MIN_GRID_CELL_BUDGET);
    let cap = ((budget as f64).sqrt().floor() as usize).max(1);
    if wanted > cap {
        warn!(
            "Grid of {}x{} cells for {} particles exceeds the cell budget; capping at {}x{}.",
            wanted, wanted, num_particles, cap, cap
        );
        return cap;
    }
    wanted
}

/// A disc of `radius` never overlaps two periodic copies of one cell.
fn grid_is_exact(domain_size: f64, radius: f64, cells: usize) -> bool {
    2.0 * radius < domain_size - domain_size / cells as f64
}
