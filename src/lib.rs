//! Active Brownian particles on a periodic square with a flood-fill spatial grid.

pub mod ensemble;
pub mod error;
pub mod grid;
pub mod integrator;
pub mod neighbors;
pub mod noise;
pub mod particle;
pub mod simulation;
pub mod state;

pub use ensemble::{Ensemble, Visibility};
pub use error::SimError;
pub use grid::{DiscMean, SpatialGrid};
pub use integrator::{FnIntegrator, HeunIntegrator, Integrator};
pub use noise::{ChannelNoise, NoiseChannel, NoiseSource};
pub use particle::{ParticleEntry, ParticleRegistry};
pub use simulation::Simulation;
