//! All-pairs neighborhood scan on the periodic square.
//!
//! Used when a local-visibility ensemble runs without a grid, and as the
//! reference the grid is checked against.

use abp_common::Vec2;

use crate::grid::DiscMean;

/// Periodic copies of `p` that can reach into the domain within `radius`.
///
/// `p` itself always comes first. A copy across an edge is kept when
/// `p` is closer than `radius` to that edge, a copy across a corner when `p`
/// is closer than `radius` to that corner. At most 4 of the 8 copies apply
/// at once while `radius < side / 2`.
pub fn periodic_images(p: Vec2, side: f64, radius: f64) -> Vec<Vec2> {
    let mut images = Vec::with_capacity(4);
    images.push(p);
    // through the edges
    if p.distance_to_vertical(0.0) < radius {
        images.push(p + Vec2::new(side, 0.0));
    }
    if p.distance_to_vertical(side) < radius {
        images.push(p + Vec2::new(-side, 0.0));
    }
    if p.distance_to_horizontal(0.0) < radius {
        images.push(p + Vec2::new(0.0, side));
    }
    if p.distance_to_horizontal(side) < radius {
        images.push(p + Vec2::new(0.0, -side));
    }
    // through the corners
    if p.distance(Vec2::new(0.0, 0.0)) < radius {
        images.push(p + Vec2::new(side, side));
    }
    if p.distance(Vec2::new(0.0, side)) < radius {
        images.push(p + Vec2::new(side, -side));
    }
    if p.distance(Vec2::new(side, 0.0)) < radius {
        images.push(p + Vec2::new(-side, side));
    }
    if p.distance(Vec2::new(side, side)) < radius {
        images.push(p + Vec2::new(-side, -side));
    }
    images
}

/// Mean velocity of every particle other than `id` lying strictly within
/// `radius` of particle `id` on the periodic square of side `side`.
pub fn brute_force_disc_mean(
    id: usize,
    positions: &[Vec2],
    velocities: &[Vec2],
    side: f64,
    radius: f64,
) -> DiscMean {
    let r2 = radius * radius;
    let images = periodic_images(positions[id], side, radius);

    let mut sum = Vec2::zero();
    let mut count = 0;
    for (other, (p, v)) in positions.iter().zip(velocities).enumerate() {
        if other == id {
            continue;
        }
        if images.iter().any(|image| p.distance_squared(*image) < r2) {
            sum += *v;
            count += 1;
        }
    }
    DiscMean::from_sum(sum, count)
}

/// Mean of all velocities (global visibility).
pub fn global_mean(velocities: &[Vec2]) -> Vec2 {
    if velocities.is_empty() {
        return Vec2::zero();
    }
    let sum = velocities.iter().fold(Vec2::zero(), |acc, v| acc + *v);
    sum / velocities.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_point_has_no_images() {
        assert_eq!(periodic_images(Vec2::new(5.0, 5.0), 10.0, 1.0).len(), 1);
    }

    #[test]
    fn corner_point_gets_two_edges_and_one_corner() {
        let images = periodic_images(Vec2::new(9.5, 0.5), 10.0, 1.0);
        assert_eq!(images.len(), 4);
        assert!(images.contains(&Vec2::new(-0.5, 0.5)));
        assert!(images.contains(&Vec2::new(9.5, 10.5)));
        assert!(images.contains(&Vec2::new(-0.5, 10.5)));
    }

    #[test]
    fn counts_wrapped_neighbor_once() {
        // Close to both the plain point and its mirror would still be one neighbor.
        let positions = vec![Vec2::new(0.2, 5.0), Vec2::new(9.9, 5.0), Vec2::new(5.0, 5.0)];
        let velocities = vec![Vec2::zero(), Vec2::new(2.0, 0.0), Vec2::new(9.0, 9.0)];
        let found = brute_force_disc_mean(0, &positions, &velocities, 10.0, 1.0);
        assert_eq!(found.count, 1);
        assert_eq!(found.mean, Vec2::new(2.0, 0.0));
    }

    #[test]
    fn global_mean_of_opposites_is_zero() {
        let v = [Vec2::new(1.0, 2.0), Vec2::new(-1.0, -2.0)];
        assert_eq!(global_mean(&v), Vec2::zero());
        assert_eq!(global_mean(&[]), Vec2::zero());
    }
}
