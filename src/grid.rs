//! Toroidal uniform grid for disc-neighborhood queries.
//!
//! The domain `[0, width) × [0, height)` is cut into `xcells × ycells` cells,
//! each owning the ids of the particles currently inside it. A disc query
//! flood-fills outward from the query particle's cell. Every cell reached
//! through a periodic edge carries its own copy of the query center shifted by
//! one domain period, so inside any visited cell the disc test is a plain
//! Euclidean comparison and the minimum-image convention falls out for free.

use std::collections::VecDeque;
use std::fmt::Write as _;

use abp_common::Vec2;
use log::{debug, warn};

use crate::error::SimError;
use crate::particle::ParticleRegistry;

/// The 8 neighboring cells.
const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Result of a disc aggregation: mean velocity of the neighbors found and their number.
/// The query particle itself is never counted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscMean {
    pub mean: Vec2,
    pub count: usize,
}

impl DiscMean {
    pub const EMPTY: DiscMean = DiscMean { mean: Vec2::zero(), count: 0 };

    /// Mean from a velocity sum; zero vector when nothing was found.
    pub fn from_sum(sum: Vec2, count: usize) -> Self {
        if count == 0 {
            Self::EMPTY
        } else {
            DiscMean { mean: sum / count as f64, count }
        }
    }
}

pub struct SpatialGrid {
    /* spatial sizes of the area under the grid */
    width: f64,
    height: f64,
    /* dimensions of the grid */
    xcells: usize,
    ycells: usize,
    /* spatial sizes of one cell */
    cell_w: f64,
    cell_h: f64,
    inv_cell_w: f64,
    inv_cell_h: f64,
    /// Member ids per cell, flat index `cy * xcells + cx`.
    cells: Vec<Vec<usize>>,
    registry: ParticleRegistry,
    /// Query generation that last visited each cell.
    visited: Vec<u64>,
    /// Current query generation; bumped after every flood fill.
    generation: u64,
    queue: VecDeque<(usize, usize, Vec2)>,
}

impl SpatialGrid {
    /// Creates an empty grid over `[0, width) × [0, height)`.
    pub fn new(width: f64, height: f64, xcells: usize, ycells: usize) -> Result<Self, SimError> {
        if xcells == 0 || ycells == 0 {
            return Err(SimError::invalid(format!(
                "grid needs at least one cell per axis, got {}x{}",
                xcells, ycells
            )));
        }
        if !(width.is_finite() && width > 0.0 && height.is_finite() && height > 0.0) {
            return Err(SimError::invalid(format!(
                "grid domain must be positive, got {}x{}",
                width, height
            )));
        }
        let num_cells = xcells.checked_mul(ycells).ok_or_else(|| {
            SimError::invalid(format!("grid of {}x{} cells is too large", xcells, ycells))
        })?;

        let cell_w = width / xcells as f64;
        let cell_h = height / ycells as f64;
        debug!(
            "Spatial grid {}x{} over {:.3}x{:.3} (cell {:.4}x{:.4}).",
            xcells, ycells, width, height, cell_w, cell_h
        );

        Ok(Self {
            width,
            height,
            xcells,
            ycells,
            cell_w,
            cell_h,
            inv_cell_w: 1.0 / cell_w,
            inv_cell_h: 1.0 / cell_h,
            cells: vec![Vec::new(); num_cells],
            registry: ParticleRegistry::new(),
            visited: vec![0; num_cells],
            generation: 1,
            queue: VecDeque::new(),
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.xcells, self.ycells)
    }

    pub fn cell_size(&self) -> (f64, f64) {
        (self.cell_w, self.cell_h)
    }

    /// Number of inserted particles.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.registry.contains(id)
    }

    /// Grid coordinates of the cell containing `pos`.
    ///
    /// Coordinates outside the domain are clamped onto the border cells. This
    /// also absorbs rounding when `pos.x / cell_w` lands exactly on `xcells`.
    #[inline]
    pub fn cell_of(&self, pos: Vec2) -> (usize, usize) {
        // `as usize` saturates negatives (and NaN) to 0.
        let cx = ((pos.x * self.inv_cell_w).floor() as usize).min(self.xcells - 1);
        let cy = ((pos.y * self.inv_cell_h).floor() as usize).min(self.ycells - 1);
        (cx, cy)
    }

    pub fn cell_of_particle(&self, id: usize) -> Option<(usize, usize)> {
        self.registry
            .get(id)
            .map(|entry| (entry.cell % self.xcells, entry.cell / self.xcells))
    }

    /// Stored position of an inserted particle.
    pub fn position_of(&self, id: usize) -> Option<Vec2> {
        self.registry.get(id).map(|entry| entry.position)
    }

    pub fn cell_population(&self, cx: usize, cy: usize) -> usize {
        self.cells[self.flat(cx, cy)].len()
    }

    #[inline]
    fn flat(&self, cx: usize, cy: usize) -> usize {
        cy * self.xcells + cx
    }

    #[inline]
    fn check_in_domain(&self, id: usize, pos: Vec2) {
        debug_assert!(
            pos.is_inside(self.width, self.height),
            "particle {} at ({}, {}) is outside the {}x{} grid domain",
            id,
            pos.x,
            pos.y,
            self.width,
            self.height
        );
    }

    /// Adds particle `id` at `pos` to the cell containing it.
    ///
    /// `pos` must lie in the domain: debug builds assert it, release builds
    /// file the particle under the nearest border cell. Inserting an id that is
    /// already present is treated as a relocation.
    pub fn insert(&mut self, id: usize, pos: Vec2) {
        self.check_in_domain(id, pos);
        if self.registry.contains(id) {
            debug_assert!(false, "particle {} inserted twice", id);
            warn!("Particle {} inserted twice; relocating instead.", id);
            self.relocate(id, pos);
            return;
        }
        let (cx, cy) = self.cell_of(pos);
        let cell = self.flat(cx, cy);
        let slot = self.cells[cell].len();
        self.cells[cell].push(id);
        self.registry.bind(id, pos, cell, slot);
    }

    /// Moves particle `id` to `pos`, relinking it only if the cell changed.
    ///
    /// Same domain precondition as [`insert`](Self::insert). A particle that was
    /// never inserted is inserted.
    pub fn relocate(&mut self, id: usize, pos: Vec2) {
        self.check_in_domain(id, pos);
        let (cx, cy) = self.cell_of(pos);
        let new_cell = self.flat(cx, cy);
        let new_slot = self.cells[new_cell].len();

        let Some(entry) = self.registry.get_mut(id) else {
            debug_assert!(false, "particle {} relocated before insertion", id);
            self.insert(id, pos);
            return;
        };
        entry.position = pos;
        // The flat index matches only when both cx and cy match.
        if entry.cell == new_cell {
            return;
        }
        let (old_cell, old_slot) = (entry.cell, entry.slot);
        entry.cell = new_cell;
        entry.slot = new_slot;

        let members = &mut self.cells[old_cell];
        members.swap_remove(old_slot);
        if let Some(&moved) = members.get(old_slot) {
            if let Some(moved_entry) = self.registry.get_mut(moved) {
                moved_entry.slot = old_slot;
            }
        }
        self.cells[new_cell].push(id);
    }

    /// Relocates (or inserts) particle `i` to `positions[i]` for every index.
    pub fn sync(&mut self, positions: &[Vec2]) {
        for (id, &pos) in positions.iter().enumerate() {
            self.relocate_or_insert(id, pos);
        }
    }

    fn relocate_or_insert(&mut self, id: usize, pos: Vec2) {
        if self.registry.contains(id) {
            self.relocate(id, pos);
        } else {
            self.insert(id, pos);
        }
    }

    /// Removes every particle. Cell storage is kept for reuse.
    pub fn clear(&mut self) {
        for members in &mut self.cells {
            members.clear();
        }
        self.registry.clear();
    }

    /// Could any point of cell `(gx, gy)` lie strictly inside the disc around `center`?
    ///
    /// `center` is the virtual center in the cell's own coordinate frame.
    fn cell_in_disc(&self, gx: usize, gy: usize, center: Vec2, r2: f64) -> bool {
        let x = gx as f64 * self.cell_w - center.x;
        let y = gy as f64 * self.cell_h - center.y;
        let x1 = x + self.cell_w;
        let y1 = y + self.cell_h;

        if x * x + y * y < r2
            || x1 * x1 + y * y < r2
            || x * x + y1 * y1 < r2
            || x1 * x1 + y1 * y1 < r2
        {
            return true;
        }
        // The arc may cross one side twice while every corner stays outside.
        let spans_x = x < 0.0 && 0.0 < x1;
        let spans_y = y < 0.0 && 0.0 < y1;
        match (spans_x, spans_y) {
            (true, true) => true,
            (true, false) => y * y < r2 || y1 * y1 < r2,
            (false, true) => x * x < r2 || x1 * x1 < r2,
            (false, false) => false,
        }
    }

    /// Calls `visit(other_id)` for every other particle strictly within `radius`
    /// (minimum-image distance) of particle `id`. Each neighbor is reported once.
    ///
    /// Results are exact while `2 * radius < domain - cell size` on both axes;
    /// beyond that a disc could overlap two periodic copies of the same cell and
    /// only the first copy reached is examined.
    pub fn for_each_in_disc<F>(&mut self, id: usize, radius: f64, mut visit: F)
    where
        F: FnMut(usize),
    {
        let Some(entry) = self.registry.get(id).copied() else {
            warn!("Disc query for particle {} which is not in the grid.", id);
            return;
        };
        let r2 = radius * radius;
        let generation = self.generation;
        let home = (entry.cell % self.xcells, entry.cell / self.xcells);

        self.queue.clear();
        self.queue.push_back((home.0, home.1, entry.position));
        self.visited[entry.cell] = generation;
        self.scan_cell(entry.cell, entry.position, r2, id, &mut visit);

        while let Some((gx, gy, center)) = self.queue.pop_front() {
            for (dx, dy) in NEIGHBOR_OFFSETS {
                let mut nx = gx as isize + dx;
                let mut ny = gy as isize + dy;
                let mut ncenter = center;
                if nx < 0 {
                    nx += self.xcells as isize;
                    ncenter.x += self.width;
                } else if nx >= self.xcells as isize {
                    nx -= self.xcells as isize;
                    ncenter.x -= self.width;
                }
                if ny < 0 {
                    ny += self.ycells as isize;
                    ncenter.y += self.height;
                } else if ny >= self.ycells as isize {
                    ny -= self.ycells as isize;
                    ncenter.y -= self.height;
                }
                let (nx, ny) = (nx as usize, ny as usize);
                let cell = self.flat(nx, ny);
                if self.visited[cell] == generation {
                    continue;
                }
                if !self.cell_in_disc(nx, ny, ncenter, r2) {
                    continue;
                }
                self.visited[cell] = generation;
                self.queue.push_back((nx, ny, ncenter));
                self.scan_cell(cell, ncenter, r2, id, &mut visit);
            }
        }

        self.generation += 1;
    }

    /// Reports members of `cell` strictly inside the disc around `center`, skipping `skip`.
    fn scan_cell<F>(&self, cell: usize, center: Vec2, r2: f64, skip: usize, visit: &mut F)
    where
        F: FnMut(usize),
    {
        for &other in &self.cells[cell] {
            if other == skip {
                continue;
            }
            let Some(entry) = self.registry.get(other) else { continue };
            if entry.position.distance_squared(center) < r2 {
                visit(other);
            }
        }
    }

    /// Mean velocity of every other particle within `radius` of particle `id`.
    ///
    /// `velocities` is indexed by particle id and must cover every inserted id.
    /// An empty neighborhood yields the zero vector with count 0.
    pub fn query_disc_mean_velocity(&mut self, id: usize, radius: f64, velocities: &[Vec2]) -> DiscMean {
        let mut sum = Vec2::zero();
        let mut count = 0;
        self.for_each_in_disc(id, radius, |other| {
            sum += velocities[other];
            count += 1;
        });
        DiscMean::from_sum(sum, count)
    }

    /// Ids of every other particle within `radius` of particle `id`, in visit order.
    pub fn neighbors_in_disc(&mut self, id: usize, radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        self.for_each_in_disc(id, radius, |other| found.push(other));
        found
    }

    /// Textual listing of every non-empty cell and its members.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for cx in 0..self.xcells {
            for cy in 0..self.ycells {
                let members = &self.cells[self.flat(cx, cy)];
                if members.is_empty() {
                    continue;
                }
                let _ = writeln!(
                    out,
                    "in cell at ({:.6},{:.6})",
                    cx as f64 * self.cell_w,
                    cy as f64 * self.cell_h
                );
                for id in members {
                    let _ = writeln!(out, "- #{}", id);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIDE: f64 = 10.0;
    const NCELLS: usize = 100;

    /// Grid plus a velocity table, particles numbered in insertion order.
    struct Scene {
        grid: SpatialGrid,
        velocities: Vec<Vec2>,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                grid: SpatialGrid::new(SIDE, SIDE, NCELLS, NCELLS).unwrap(),
                velocities: Vec::new(),
            }
        }

        fn add(&mut self, x: f64, y: f64, vx: f64, vy: f64) -> usize {
            let id = self.velocities.len();
            self.velocities.push(Vec2::new(vx, vy));
            self.grid.insert(id, Vec2::new(x, y));
            id
        }

        fn disc(&mut self, id: usize, radius: f64) -> DiscMean {
            self.grid.query_disc_mean_velocity(id, radius, &self.velocities)
        }
    }

    fn assert_close(actual: Vec2, expected: Vec2) {
        assert!(
            actual.distance(expected) < 1e-9,
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn rejects_degenerate_construction() {
        assert!(matches!(
            SpatialGrid::new(10.0, 10.0, 0, 4),
            Err(SimError::InvalidConfiguration(_))
        ));
        assert!(SpatialGrid::new(10.0, 10.0, 4, 0).is_err());
        assert!(SpatialGrid::new(0.0, 10.0, 4, 4).is_err());
        assert!(SpatialGrid::new(10.0, -1.0, 4, 4).is_err());
        assert!(SpatialGrid::new(f64::NAN, 10.0, 4, 4).is_err());
    }

    #[test]
    fn lone_particle_has_no_neighbors() {
        let mut scene = Scene::new();
        scene.add(3.0, 4.0, 1.0, 0.0);
        assert_eq!(scene.disc(0, 1.0), DiscMean::EMPTY);
    }

    #[test]
    fn averages_particles_inside_disc() {
        let mut scene = Scene::new();
        scene.add(3.0, 3.0, 3.0, 3.0);
        scene.add(2.0, 2.0, 1.0, 1.0);
        scene.add(4.0, 4.0, 1.0, 3.0);

        let found = scene.disc(0, 2.0);
        assert_eq!(found.count, 2);
        assert_close(found.mean, Vec2::new(1.0, 2.0));
    }

    #[test]
    fn ignores_particles_outside_disc() {
        let mut scene = Scene::new();
        scene.add(3.0, 3.0, 3.0, 3.0);
        scene.add(2.0, 2.0, 0.5, 0.5);
        scene.add(5.0, 5.0, 10.0, 10.0);

        let found = scene.disc(0, 2.0);
        assert_eq!(found.count, 1);
        assert_close(found.mean, Vec2::new(0.5, 0.5));
    }

    #[test]
    fn disc_wraps_across_left_edge() {
        let mut scene = Scene::new();
        scene.add(1.0, 3.0, 3.0, 3.0);
        scene.add(SIDE - 0.5, 3.0, 4.0, 3.0);

        let found = scene.disc(0, 2.0);
        assert_eq!(found.count, 1);
        assert_close(found.mean, Vec2::new(4.0, 3.0));
    }

    #[test]
    fn disc_wraps_across_bottom_edge() {
        let mut scene = Scene::new();
        scene.add(5.0, 1.0, 3.0, 3.0);
        scene.add(4.0, SIDE - 0.1, 3.0, 4.0);
        scene.add(6.0, SIDE - 1.0, 10.0, 5.0);

        let found = scene.disc(0, 2.0);
        assert_eq!(found.count, 1);
        assert_close(found.mean, Vec2::new(3.0, 4.0));
    }

    #[test]
    fn disc_around_corner_wraps_each_axis() {
        let mut scene = Scene::new();
        scene.add(9.0, 9.0, 100.0, 100.0);
        scene.add(6.0, 6.0, 100.0, 200.0);
        scene.add(9.0, 11.0 - SIDE, 3.0, 0.0);
        scene.add(11.0 - SIDE, 9.0, 0.0, 4.0);
        scene.add(12.0 - SIDE, 12.0 - SIDE, 200.0, 100.0);

        let found = scene.disc(0, 3.0);
        assert_eq!(found.count, 2);
        assert_close(found.mean, Vec2::new(1.5, 2.0));
    }

    #[test]
    fn disc_around_corner_reaches_diagonal_copy() {
        let mut scene = Scene::new();
        scene.add(9.0, 9.0, 0.0, 0.0);
        scene.add(0.5, 0.5, 2.0, -2.0);

        let found = scene.disc(0, 3.0);
        assert_eq!(found.count, 1);
        assert_close(found.mean, Vec2::new(2.0, -2.0));
    }

    #[test]
    fn small_disc_clips_vertical_side_without_corners() {
        let mut scene = Scene::new();
        let base = SIDE / 2.0;
        let radius = (SIDE / NCELLS as f64) / 2.0;
        scene.add(base + radius * 1.5, base + radius, 3.0, 3.0);
        scene.add(base + radius * (1.5 + 0.6), base + radius, 3.0, 4.0);

        let found = scene.disc(0, radius);
        assert_eq!(found.count, 1);
        assert_close(found.mean, Vec2::new(3.0, 4.0));
    }

    #[test]
    fn small_disc_clips_horizontal_side_without_corners() {
        let mut scene = Scene::new();
        let base = SIDE / 2.0;
        let radius = (SIDE / NCELLS as f64) / 2.0;
        scene.add(base + radius, base + radius * 1.5, 3.0, 3.0);
        scene.add(base + radius, base + radius * (1.5 + 0.6), 6.0, 8.0);

        let found = scene.disc(0, radius);
        assert_eq!(found.count, 1);
        assert_close(found.mean, Vec2::new(6.0, 8.0));
    }

    #[test]
    fn repeated_queries_ignore_stale_marks() {
        let mut scene = Scene::new();
        scene.add(5.0, 5.0, 0.0, 0.0);
        scene.add(5.5, 5.0, 1.0, 0.0);
        scene.add(4.5, 5.2, 0.0, 1.0);

        let first = scene.disc(0, 1.0);
        for _ in 0..5 {
            assert_eq!(scene.disc(0, 1.0), first);
        }
        assert_eq!(first.count, 2);
    }

    #[test]
    fn move_within_cell_keeps_membership() {
        let mut grid = SpatialGrid::new(SIDE, SIDE, 10, 10).unwrap();
        grid.insert(0, Vec2::new(3.1, 4.1));
        grid.insert(1, Vec2::new(3.2, 4.2));
        grid.relocate(0, Vec2::new(3.9, 4.9));

        assert_eq!(grid.cell_of_particle(0), Some((3, 4)));
        assert_eq!(grid.cell_population(3, 4), 2);
        assert_eq!(grid.position_of(0), Some(Vec2::new(3.9, 4.9)));
    }

    #[test]
    fn move_along_one_axis_relinks() {
        let mut grid = SpatialGrid::new(SIDE, SIDE, 10, 10).unwrap();
        grid.insert(0, Vec2::new(3.5, 4.5));
        // Only cx changes; cy stays the same.
        grid.relocate(0, Vec2::new(5.5, 4.5));
        assert_eq!(grid.cell_of_particle(0), Some((5, 4)));
        assert_eq!(grid.cell_population(3, 4), 0);
        assert_eq!(grid.cell_population(5, 4), 1);

        // Only cy changes.
        grid.relocate(0, Vec2::new(5.5, 0.5));
        assert_eq!(grid.cell_of_particle(0), Some((5, 0)));
        assert_eq!(grid.cell_population(5, 4), 0);
    }

    #[test]
    fn swap_remove_keeps_remaining_slots_valid() {
        let mut grid = SpatialGrid::new(SIDE, SIDE, 10, 10).unwrap();
        for id in 0..4 {
            grid.insert(id, Vec2::new(2.1 + 0.1 * id as f64, 2.5));
        }
        grid.relocate(0, Vec2::new(8.5, 8.5));
        grid.relocate(2, Vec2::new(8.6, 8.5));
        // Ids 1 and 3 remain, and each can still be moved out cleanly.
        assert_eq!(grid.cell_population(2, 2), 2);
        grid.relocate(3, Vec2::new(8.7, 8.5));
        grid.relocate(1, Vec2::new(8.8, 8.5));
        assert_eq!(grid.cell_population(2, 2), 0);
        assert_eq!(grid.cell_population(8, 8), 4);
        assert_eq!(grid.len(), 4);

        let mut found = grid.neighbors_in_disc(0, 1.0);
        found.sort_unstable();
        assert_eq!(found, vec![1, 2, 3]);
    }

    #[test]
    fn sync_inserts_then_relocates() {
        let mut grid = SpatialGrid::new(SIDE, SIDE, 5, 5).unwrap();
        let mut positions = vec![Vec2::new(1.0, 1.0), Vec2::new(9.0, 9.0)];
        grid.sync(&positions);
        assert_eq!(grid.len(), 2);
        positions[1] = Vec2::new(1.5, 1.5);
        grid.sync(&positions);
        assert_eq!(grid.cell_of_particle(1), Some((0, 0)));
        assert_eq!(grid.cell_population(0, 0), 2);

        grid.clear();
        assert!(grid.is_empty());
        assert_eq!(grid.cell_population(0, 0), 0);
    }

    #[test]
    fn dump_lists_members_per_cell() {
        let mut grid = SpatialGrid::new(SIDE, SIDE, 2, 2).unwrap();
        grid.insert(4, Vec2::new(1.0, 1.0));
        grid.insert(7, Vec2::new(6.0, 1.0));
        let text = grid.dump();
        assert_eq!(
            text,
            "in cell at (0.000000,0.000000)\n- #4\nin cell at (5.000000,0.000000)\n- #7\n"
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "outside")]
    fn insert_outside_domain_is_a_precondition_violation() {
        let mut grid = SpatialGrid::new(SIDE, SIDE, 10, 10).unwrap();
        grid.insert(0, Vec2::new(SIDE + 1.0, 0.0));
    }
}
