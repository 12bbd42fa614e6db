use serde::{Serialize, Deserialize};

/// A snapshot of the ensemble and its observables at one observation tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Observation tick at which the snapshot was taken.
    pub iteration: u64,
    /// Simulated time since the start of the observation phase.
    pub time: f64,
    pub particle_count: usize,
    /// Magnitude of the mean velocity of the ensemble (order parameter).
    pub average_speed: f64,
    /// Running speed measurement, absent before the first measured tick.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurement: Option<f64>,
    /// `neighbor_counts_distribution[k]` is the number of particles that saw exactly
    /// `k` neighbors on the last tick. Empty with global visibility.
    pub neighbor_counts_distribution: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<(f64, f64)>>,
}
