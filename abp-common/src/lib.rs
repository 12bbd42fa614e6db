pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    InitialConditions, IntegrationConfig, ModelConfig, NoiseIntensities, OutputConfig,
    OutputFormat, Placement, SimulationConfig,
};
pub use sim_params::ModelParams;
pub use snapshot::Snapshot;
pub use vecmath::Vec2;
