use serde::{Deserialize, Serialize};
use anyhow::{Context, Result};
use crate::sim_params::ModelParams;
use std::path::Path;

// Integration schedule
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IntegrationConfig {
    /// Ticks run before the speed measurement starts.
    pub relaxation_iterations: u64,
    /// Ticks run while measuring.
    pub observation_iterations: u64,
    /// SDE time step `h` for the velocity integrator.
    pub time_step: f64,
    /// Euler step for positions; defaults to `time_step`.
    #[serde(default)]
    pub position_time_step: Option<f64>,
}

// Intensities of the three independent noise terms
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NoiseIntensities {
    /// Isotropic ("passive") noise D_E.
    pub passive_noise: f64,
    /// Radial speed noise D_v.
    pub speed_noise: f64,
    /// Tangential (angular) noise D_phi.
    pub angular_noise: f64,
}

// Model parameters
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelConfig {
    pub number_of_particles: usize,
    /// Side `L` of the square periodic domain.
    pub rectangle_size: f64,
    /// If true a particle only sees the particles within `epsilon` of it.
    pub local_visibility: bool,
    /// Visibility radius, only read with local visibility.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Coupling strength to the neighborhood mean velocity.
    pub mu: f64,
    #[serde(default = "default_use_grid")]
    pub use_grid: bool,
    pub noise_intensities: NoiseIntensities,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    /// Gaussian cloud around the domain center.
    Clustered,
    /// Uniform over the (slightly inset) domain.
    Uniform,
}

// Initial conditions for the ensemble
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InitialConditions {
    #[serde(default = "default_placement")]
    pub placement: Placement,
    #[serde(default = "default_speed_lowest")]
    pub speed_lowest: f64,
    #[serde(default = "default_speed_highest")]
    pub speed_highest: f64,
    /// Base seed for every noise channel.
    pub seed: u64,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Bincode,
    Messagepack,
}

// Configuration for output settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    /// Log positions and record a snapshot every this many observation ticks.
    #[serde(default = "default_log_interval")]
    pub log_interval: u64,
    #[serde(default)]
    pub save_trajectory: bool,
    #[serde(default)]
    pub save_stats: bool,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub save_final_positions: bool,
    #[serde(default)]
    pub positions_in_snapshot: bool,
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_use_grid() -> bool {
    true
}

fn default_placement() -> Placement {
    Placement::Clustered
}

fn default_speed_lowest() -> f64 {
    -0.5
}

fn default_speed_highest() -> f64 {
    0.5
}

fn default_log_interval() -> u64 {
    256
}

// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub integration: IntegrationConfig,
    pub model: ModelConfig,
    pub initial_conditions: InitialConditions,
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .with_context(|| format!("Failed to read config file '{}'", path_ref.display()))?;
        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid configuration in '{}'", path_ref.display()))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        if model.number_of_particles == 0 {
            anyhow::bail!("number_of_particles must be greater than 0.");
        }
        if !(model.rectangle_size.is_finite() && model.rectangle_size > 0.0) {
            anyhow::bail!("rectangle_size must be positive.");
        }
        if model.local_visibility && !(model.epsilon.is_finite() && model.epsilon > 0.0) {
            anyhow::bail!("epsilon must be positive with local visibility.");
        }
        if !(self.integration.time_step.is_finite() && self.integration.time_step > 0.0) {
            anyhow::bail!("time_step must be positive.");
        }
        if let Some(rh) = self.integration.position_time_step {
            if !(rh.is_finite() && rh > 0.0) {
                anyhow::bail!("position_time_step must be positive.");
            }
        }
        let noise = &model.noise_intensities;
        for (name, value) in [
            ("passive_noise", noise.passive_noise),
            ("speed_noise", noise.speed_noise),
            ("angular_noise", noise.angular_noise),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                anyhow::bail!("{} must be non-negative.", name);
            }
        }
        let ic = &self.initial_conditions;
        if ic.speed_lowest > ic.speed_highest {
            anyhow::bail!(
                "speed_lowest ({}) must not exceed speed_highest ({}).",
                ic.speed_lowest,
                ic.speed_highest
            );
        }
        if self.output.log_interval == 0 {
            anyhow::bail!("log_interval must be greater than 0.");
        }
        Ok(())
    }

    /// Converts the configuration into the numeric parameters used by the integrators.
    pub fn get_model_params(&self) -> ModelParams {
        let noise = &self.model.noise_intensities;
        let h = self.integration.time_step;
        let rh = self.integration.position_time_step.unwrap_or(h);

        let mut params = ModelParams::new(
            self.model.mu,
            noise.passive_noise,
            noise.speed_noise,
            noise.angular_noise,
            h,
        );
        params.rh = rh;
        params
    }
}
