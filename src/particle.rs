//! Id-indexed bookkeeping of where each particle sits in the spatial grid.

use abp_common::Vec2;

/// Where an inserted particle lives: its position and its slot in the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleEntry {
    pub position: Vec2,
    /// Flat cell index (`cy * xcells + cx`).
    pub cell: usize,
    /// Index of the particle id inside that cell's member list.
    pub slot: usize,
}

/// Dense id → entry table owned by the grid.
///
/// Velocities are not stored here: a located id indexes straight into the
/// velocity slice owned by the ensemble.
#[derive(Debug, Clone, Default)]
pub struct ParticleRegistry {
    entries: Vec<Option<ParticleEntry>>,
    bound: usize,
}

impl ParticleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to a position and grid slot. Returns false if `id` was already bound.
    pub fn bind(&mut self, id: usize, position: Vec2, cell: usize, slot: usize) -> bool {
        if id >= self.entries.len() {
            self.entries.resize(id + 1, None);
        }
        let entry = &mut self.entries[id];
        if entry.is_some() {
            return false;
        }
        *entry = Some(ParticleEntry { position, cell, slot });
        self.bound += 1;
        true
    }

    #[inline]
    pub fn get(&self, id: usize) -> Option<&ParticleEntry> {
        self.entries.get(id).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, id: usize) -> Option<&mut ParticleEntry> {
        self.entries.get_mut(id).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: usize) -> bool {
        self.get(id).is_some()
    }

    /// Number of bound particles.
    pub fn len(&self) -> usize {
        self.bound
    }

    pub fn is_empty(&self) -> bool {
        self.bound == 0
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bound = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_is_sparse_and_rejects_duplicates() {
        let mut reg = ParticleRegistry::new();
        assert!(reg.bind(3, Vec2::new(1.0, 2.0), 7, 0));
        assert!(!reg.bind(3, Vec2::zero(), 0, 0));
        assert_eq!(reg.len(), 1);
        assert!(!reg.contains(0));
        assert_eq!(reg.get(3).map(|e| e.cell), Some(7));
    }

    #[test]
    fn clear_unbinds_everything() {
        let mut reg = ParticleRegistry::new();
        reg.bind(0, Vec2::zero(), 0, 0);
        reg.bind(1, Vec2::zero(), 0, 1);
        reg.clear();
        assert!(reg.is_empty());
        assert!(reg.get(1).is_none());
    }
}
