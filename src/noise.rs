//! Independent random streams addressed by channel.
//!
//! Every channel owns its own generator, so drawing from one (e.g. the
//! angular noise) never shifts the sequence seen by another (e.g. the passive
//! x/y noise).

use rand::prelude::*;
use rand_distr::StandardNormal;

/// Named random stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseChannel {
    /// x component of the isotropic passive noise.
    PassiveX,
    /// y component of the isotropic passive noise.
    PassiveY,
    /// Radial speed noise.
    Speed,
    /// Tangential (angular) noise.
    Angle,
    /// Initial placement of positions and velocities.
    Placement,
}

impl NoiseChannel {
    pub const COUNT: usize = 5;
    pub const ALL: [NoiseChannel; NoiseChannel::COUNT] = [
        NoiseChannel::PassiveX,
        NoiseChannel::PassiveY,
        NoiseChannel::Speed,
        NoiseChannel::Angle,
        NoiseChannel::Placement,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Source of standard-normal and uniform `[0, 1)` variates.
pub trait NoiseSource {
    fn gaussian(&mut self, channel: NoiseChannel) -> f64;
    fn uniform(&mut self, channel: NoiseChannel) -> f64;
}

impl<N: NoiseSource + ?Sized> NoiseSource for &mut N {
    fn gaussian(&mut self, channel: NoiseChannel) -> f64 {
        (**self).gaussian(channel)
    }

    fn uniform(&mut self, channel: NoiseChannel) -> f64 {
        (**self).uniform(channel)
    }
}

// Per-channel seed offsets, so equal base seeds still give unrelated streams.
const CHANNEL_SALT: [u64; NoiseChannel::COUNT] = [
    0x9E37_79B9_7F4A_7C15,
    0xBF58_476D_1CE4_E5B9,
    0x94D0_49BB_1331_11EB,
    0xD6E8_FEB8_6659_FD93,
    0xA076_1D64_78BD_642F,
];

/// One `StdRng` per channel, all derived from a single base seed.
#[derive(Debug, Clone)]
pub struct ChannelNoise {
    rngs: Vec<StdRng>,
}

impl ChannelNoise {
    pub fn seed_from_u64(seed: u64) -> Self {
        let rngs = NoiseChannel::ALL
            .iter()
            .map(|ch| StdRng::seed_from_u64(seed ^ CHANNEL_SALT[ch.index()]))
            .collect();
        Self { rngs }
    }

    #[inline]
    fn rng(&mut self, channel: NoiseChannel) -> &mut StdRng {
        &mut self.rngs[channel.index()]
    }
}

impl NoiseSource for ChannelNoise {
    fn gaussian(&mut self, channel: NoiseChannel) -> f64 {
        self.rng(channel).sample(StandardNormal)
    }

    fn uniform(&mut self, channel: NoiseChannel) -> f64 {
        self.rng(channel).random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = ChannelNoise::seed_from_u64(42);
        let mut b = ChannelNoise::seed_from_u64(42);
        for _ in 0..32 {
            assert_eq!(
                a.gaussian(NoiseChannel::Angle),
                b.gaussian(NoiseChannel::Angle)
            );
            assert_eq!(
                a.uniform(NoiseChannel::Placement),
                b.uniform(NoiseChannel::Placement)
            );
        }
    }

    #[test]
    fn channels_do_not_disturb_each_other() {
        let mut plain = ChannelNoise::seed_from_u64(3);
        let mut busy = ChannelNoise::seed_from_u64(3);
        let expected: Vec<f64> = (0..16).map(|_| plain.gaussian(NoiseChannel::PassiveX)).collect();
        let got: Vec<f64> = (0..16)
            .map(|_| {
                busy.gaussian(NoiseChannel::Angle);
                busy.uniform(NoiseChannel::Placement);
                busy.gaussian(NoiseChannel::PassiveX)
            })
            .collect();
        assert_eq!(expected, got);
    }

    #[test]
    fn channels_are_distinct_streams() {
        let mut noise = ChannelNoise::seed_from_u64(11);
        let x: Vec<f64> = (0..8).map(|_| noise.gaussian(NoiseChannel::PassiveX)).collect();
        let mut noise = ChannelNoise::seed_from_u64(11);
        let y: Vec<f64> = (0..8).map(|_| noise.gaussian(NoiseChannel::PassiveY)).collect();
        assert_ne!(x, y);
    }

    #[test]
    fn uniform_in_unit_interval_and_gaussian_centered() {
        let mut noise = ChannelNoise::seed_from_u64(5);
        let n = 20_000;
        let mut sum = 0.0;
        for _ in 0..n {
            let u = noise.uniform(NoiseChannel::Placement);
            assert!((0.0..1.0).contains(&u));
            sum += noise.gaussian(NoiseChannel::Speed);
        }
        let mean = sum / n as f64;
        assert!(mean.abs() < 0.05, "gaussian mean drifted: {mean}");
    }
}
