//! Coarse binary occupancy grid over the unit cube.

use super::{Occupancy, Vec3};

/// Default grid resolution of the reference snapshots.
pub const DEFAULT_OCCUPANCY_RESOLUTION: u32 = 128;

/// `resolution³` cells, linear index `x·res² + y·res + z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyGrid {
    resolution: u32,
    cells: Vec<bool>,
}

impl OccupancyGrid {
    /// Empty grid.
    pub fn new(resolution: u32) -> Self {
        let n = (resolution as usize).pow(3);
        Self {
            resolution,
            cells: vec![false; n],
        }
    }

    /// Every cell occupied.
    pub fn full(resolution: u32) -> Self {
        let mut grid = Self::new(resolution);
        grid.cells.iter_mut().for_each(|c| *c = true);
        grid
    }

    /// Build from cells in linear order.
    pub fn from_cells(resolution: u32, cells: Vec<bool>) -> Self {
        debug_assert_eq!(cells.len(), (resolution as usize).pow(3));
        Self { resolution, cells }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }

    /// Set a cell by grid coordinates.
    pub fn set(&mut self, x: u32, y: u32, z: u32, occupied: bool) {
        let r = self.resolution as usize;
        let idx = x as usize * r * r + y as usize * r + z as usize;
        if let Some(cell) = self.cells.get_mut(idx) {
            *cell = occupied;
        }
    }

    fn cell_coord(&self, v: f32) -> usize {
        let c = (v * self.resolution as f32).floor() as usize;
        c.min((self.resolution as usize).saturating_sub(1))
    }
}

impl Occupancy for OccupancyGrid {
    fn is_occupied(&self, point: &Vec3) -> bool {
        if point.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return false;
        }
        let r = self.resolution as usize;
        let idx = self.cell_coord(point.x) * r * r + self.cell_coord(point.y) * r + self.cell_coord(point.z);
        self.cells.get(idx).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outside_unit_cube_is_empty() {
        let grid = OccupancyGrid::full(4);
        assert!(!grid.is_occupied(&Vec3::new(-0.01, 0.5, 0.5)));
        assert!(!grid.is_occupied(&Vec3::new(0.5, 1.01, 0.5)));
        assert!(grid.is_occupied(&Vec3::new(0.5, 0.5, 0.5)));
        // The far boundary maps into the last cell.
        assert!(grid.is_occupied(&Vec3::new(1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_single_cell_lookup() {
        let mut grid = OccupancyGrid::new(4);
        grid.set(1, 2, 3, true);
        assert_eq!(grid.occupied_count(), 1);
        assert!(grid.is_occupied(&Vec3::new(0.3, 0.6, 0.9)));
        assert!(!grid.is_occupied(&Vec3::new(0.3, 0.6, 0.6)));
    }

    #[test]
    fn test_zero_resolution_grid_is_empty() {
        let grid = OccupancyGrid::full(0);
        assert_eq!(grid.num_cells(), 0);
        assert!(!grid.is_occupied(&Vec3::new(0.5, 0.5, 0.5)));
    }
}
