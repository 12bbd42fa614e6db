use serde::{Deserialize, Serialize};

/// Numeric model parameters derived from the configuration, read on every integrator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelParams {
    /// Coupling to the neighborhood mean velocity.
    pub mu: f64,

    // Noise intensities
    pub d_e: f64,
    pub d_v: f64,
    pub d_phi: f64,
    pub sqrt2_d_e: f64,
    pub sqrt2_d_v: f64,
    pub sqrt2_d_phi: f64,

    // Time
    pub h: f64, // Velocity SDE step
    pub sqrt_h: f64,
    pub rh: f64, // Position Euler step
}

impl ModelParams {
    /// Builds parameters directly from intensities and a single time step.
    pub fn new(mu: f64, d_e: f64, d_v: f64, d_phi: f64, h: f64) -> Self {
        ModelParams {
            mu,
            d_e,
            d_v,
            d_phi,
            sqrt2_d_e: (2.0 * d_e).sqrt(),
            sqrt2_d_v: (2.0 * d_v).sqrt(),
            sqrt2_d_phi: (2.0 * d_phi).sqrt(),
            h,
            sqrt_h: h.sqrt(),
            rh: h,
        }
    }
}
