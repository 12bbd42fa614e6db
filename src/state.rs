use abp_common::Vec2;

/// Kinematic state of the ensemble, held twice.
///
/// `_in` buffers are the current generation and are only read during a tick;
/// `_out` buffers receive the next generation. [`swap_buffers`](Self::swap_buffers)
/// promotes the output to input once every particle has been written.
#[derive(Debug, Clone)]
pub struct EnsembleState {
    // --- Ping-Pong Buffers ---
    // Current generation (this tick's input)
    pub positions_in: Vec<Vec2>,
    pub velocities_in: Vec<Vec2>,

    // Next generation (this tick's output)
    pub positions_out: Vec<Vec2>,
    pub velocities_out: Vec<Vec2>,
}

impl EnsembleState {
    /// Allocates zeroed buffers for `num_particles` particles.
    pub fn new(num_particles: usize) -> Self {
        Self {
            positions_in: vec![Vec2::zero(); num_particles],
            velocities_in: vec![Vec2::zero(); num_particles],
            positions_out: vec![Vec2::zero(); num_particles],
            velocities_out: vec![Vec2::zero(); num_particles],
        }
    }

    pub fn len(&self) -> usize {
        self.positions_in.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions_in.is_empty()
    }

    /// Swaps the input and output buffers for position and velocity.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.positions_in, &mut self.positions_out);
        std::mem::swap(&mut self.velocities_in, &mut self.velocities_out);
    }
}
