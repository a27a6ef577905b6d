//! Grid geometry - cell coordinates and distance helpers

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;

/// Integer cell coordinate on the map grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub x: i32,
    pub y: i32,
}

impl GridCell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance to another cell
    pub fn distance(&self, other: &GridCell) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// The four orthogonal neighbours, bounds not checked
    pub fn neighbors(&self) -> [GridCell; 4] {
        [
            GridCell::new(self.x + 1, self.y),
            GridCell::new(self.x - 1, self.y),
            GridCell::new(self.x, self.y + 1),
            GridCell::new(self.x, self.y - 1),
        ]
    }
}

/// Continuous world-space position (cell centers, interpolated movement)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    pub x: f32,
    pub y: f32,
}

/// Fixed grid over the map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridGeometry {
    pub cell_size: f32,
    pub width: i32,
    pub height: i32,
}

impl GridGeometry {
    pub fn new(cell_size: f32, width: i32, height: i32) -> Self {
        Self {
            cell_size,
            width,
            height,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.cell_size, config.grid_width(), config.grid_height())
    }

    /// Cell containing a world point
    pub fn world_to_grid(&self, x: f32, y: f32) -> GridCell {
        GridCell::new(
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }

    /// World position of a cell's center
    pub fn grid_to_world(&self, cell: GridCell) -> WorldPos {
        WorldPos {
            x: cell.x as f32 * self.cell_size + self.cell_size / 2.0,
            y: cell.y as f32 * self.cell_size + self.cell_size / 2.0,
        }
    }

    pub fn in_bounds(&self, cell: GridCell) -> bool {
        cell.x >= 0 && cell.x < self.width && cell.y >= 0 && cell.y < self.height
    }

    /// Every cell of the grid, row by row
    pub fn cells(&self) -> impl Iterator<Item = GridCell> + '_ {
        (0..self.height).flat_map(move |y| (0..self.width).map(move |x| GridCell::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> GridGeometry {
        GridGeometry::new(40.0, 20, 15)
    }

    #[test]
    fn world_to_grid_floors() {
        let g = geometry();
        assert_eq!(g.world_to_grid(0.0, 0.0), GridCell::new(0, 0));
        assert_eq!(g.world_to_grid(39.9, 40.0), GridCell::new(0, 1));
        assert_eq!(g.world_to_grid(-1.0, 85.0), GridCell::new(-1, 2));
    }

    #[test]
    fn grid_to_world_is_cell_center() {
        let g = geometry();
        assert_eq!(g.grid_to_world(GridCell::new(2, 3)), WorldPos { x: 100.0, y: 140.0 });
        let center = g.grid_to_world(GridCell::new(7, 4));
        assert_eq!(g.world_to_grid(center.x, center.y), GridCell::new(7, 4));
    }

    #[test]
    fn manhattan_distance() {
        assert_eq!(GridCell::new(1, 1).distance(&GridCell::new(4, -1)), 5);
        assert_eq!(GridCell::new(3, 3).distance(&GridCell::new(3, 3)), 0);
    }

    #[test]
    fn bounds() {
        let g = geometry();
        assert!(g.in_bounds(GridCell::new(19, 14)));
        assert!(!g.in_bounds(GridCell::new(20, 0)));
        assert!(!g.in_bounds(GridCell::new(0, -1)));
        assert_eq!(g.cells().count(), 300);
    }
}
