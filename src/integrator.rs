//! Per-particle update rules injected into [`Ensemble::step`](crate::ensemble::Ensemble::step).

use abp_common::{ModelParams, Vec2};

use crate::noise::{NoiseChannel, NoiseSource};

/// Velocity and position update rules applied to every particle each tick.
///
/// `velocity_step` receives the particle's velocity and the mean velocity of
/// its neighborhood (zero for an empty neighborhood); `position_step` receives
/// the particle's position and velocity. Both see only the generation that was
/// current when the tick started.
pub trait Integrator {
    fn velocity_step(&mut self, velocity: Vec2, neighborhood_mean: Vec2) -> Vec2;
    fn position_step(&mut self, position: Vec2, velocity: Vec2) -> Vec2;
}

/// Adapts two closures into an [`Integrator`].
pub struct FnIntegrator<V, P> {
    velocity: V,
    position: P,
}

impl<V, P> FnIntegrator<V, P>
where
    V: FnMut(Vec2, Vec2) -> Vec2,
    P: FnMut(Vec2, Vec2) -> Vec2,
{
    pub fn new(velocity: V, position: P) -> Self {
        Self { velocity, position }
    }
}

impl<V, P> Integrator for FnIntegrator<V, P>
where
    V: FnMut(Vec2, Vec2) -> Vec2,
    P: FnMut(Vec2, Vec2) -> Vec2,
{
    fn velocity_step(&mut self, velocity: Vec2, neighborhood_mean: Vec2) -> Vec2 {
        (self.velocity)(velocity, neighborhood_mean)
    }

    fn position_step(&mut self, position: Vec2, velocity: Vec2) -> Vec2 {
        (self.position)(position, velocity)
    }
}

/// Stochastic Heun (improved Euler) scheme for the active Brownian velocity SDE
///
/// `dv = f(v, u) dt + g_E dW_E + g_v dW_v + g_phi dW_phi` with drift
/// `f(v, u) = v̂ - v + mu (u - v)`, isotropic noise `g_E = sqrt(2 D_E) (1, 1)`
/// (applied component-wise), radial noise `g_v = sqrt(2 D_v) v̂` and tangential
/// noise `g_phi = sqrt(2 D_phi) normal(v̂)`. Positions advance with an Euler step.
pub struct HeunIntegrator<N> {
    params: ModelParams,
    noise: N,
}

impl<N: NoiseSource> HeunIntegrator<N> {
    pub fn new(params: ModelParams, noise: N) -> Self {
        Self { params, noise }
    }

    #[inline]
    fn drift(&self, v: Vec2, u: Vec2) -> Vec2 {
        v.unit_or_zero() - v + self.params.mu * (u - v)
    }

    #[inline]
    fn g_e(&self) -> Vec2 {
        Vec2::new(self.params.sqrt2_d_e, self.params.sqrt2_d_e)
    }

    #[inline]
    fn g_v(&self, v: Vec2) -> Vec2 {
        v.unit_or_zero() * self.params.sqrt2_d_v
    }

    #[inline]
    fn g_phi(&self, v: Vec2) -> Vec2 {
        v.unit_or_zero().normal() * self.params.sqrt2_d_phi
    }
}

impl<N: NoiseSource> Integrator for HeunIntegrator<N> {
    fn velocity_step(&mut self, v0: Vec2, u: Vec2) -> Vec2 {
        let xi_e = Vec2::new(
            self.noise.gaussian(NoiseChannel::PassiveX),
            self.noise.gaussian(NoiseChannel::PassiveY),
        );
        let xi_v = self.noise.gaussian(NoiseChannel::Speed);
        let xi_phi = self.noise.gaussian(NoiseChannel::Angle);
        let h = self.params.h;
        let sqrt_h = self.params.sqrt_h;

        // Predictor
        let f0 = self.drift(v0, u);
        let g_e0 = self.g_e();
        let g_v0 = self.g_v(v0);
        let g_phi0 = self.g_phi(v0);
        let v1 = v0 + f0 * h + (g_e0.hadamard(xi_e) + g_v0 * xi_v + g_phi0 * xi_phi) * sqrt_h;

        // Corrector
        let f1 = self.drift(v1, u);
        let g_e1 = self.g_e();
        let g_v1 = self.g_v(v1);
        let g_phi1 = self.g_phi(v1);

        let f_avg = (f0 + f1) * 0.5;
        let g_e_avg = (g_e0 + g_e1) * 0.5;
        let g_v_avg = (g_v0 + g_v1) * 0.5;
        let g_phi_avg = (g_phi0 + g_phi1) * 0.5;

        v0 + f_avg * h + (g_e_avg.hadamard(xi_e) + g_v_avg * xi_v + g_phi_avg * xi_phi) * sqrt_h
    }

    fn position_step(&mut self, r: Vec2, v: Vec2) -> Vec2 {
        r + v * self.params.rh
    }
}
