//! Static wall layout consulted by the force model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building a boundary map.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("boundary map dimensions must be non-zero (got {rows}x{cols})")]
    EmptyDimensions { rows: usize, cols: usize },
    #[error("expected {expected} cells for the given dimensions, got {actual}")]
    CellCount { expected: usize, actual: usize },
    #[error("row {row} has {actual} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected character {found:?} at row {row}, column {col}")]
    UnknownCell { row: usize, col: usize, found: char },
}

/// Immutable occupancy grid; `true` cells are walls.
///
/// Row 0 and row `rows - 1` bound the vertical extent of the walkable domain in every
/// canonical layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundaryMap {
    rows: usize,
    cols: usize,
    cells: Vec<bool>,
}

impl BoundaryMap {
    /// Build a map from a row-major cell vector.
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<bool>) -> Result<Self, BoundaryError> {
        if rows == 0 || cols == 0 {
            return Err(BoundaryError::EmptyDimensions { rows, cols });
        }
        let expected = rows * cols;
        if cells.len() != expected {
            return Err(BoundaryError::CellCount {
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self { rows, cols, cells })
    }

    /// Closed room with a one-cell wall on all four sides.
    pub fn room(rows: usize, cols: usize) -> Result<Self, BoundaryError> {
        Self::framed(rows, cols, true)
    }

    /// Open-ended corridor: walls on the top and bottom rows only.
    pub fn corridor(rows: usize, cols: usize) -> Result<Self, BoundaryError> {
        Self::framed(rows, cols, false)
    }

    fn framed(rows: usize, cols: usize, side_walls: bool) -> Result<Self, BoundaryError> {
        if rows == 0 || cols == 0 {
            return Err(BoundaryError::EmptyDimensions { rows, cols });
        }
        let mut cells = vec![false; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                let horizontal = row == 0 || row == rows - 1;
                let vertical = side_walls && (col == 0 || col == cols - 1);
                cells[row * cols + col] = horizontal || vertical;
            }
        }
        Ok(Self { rows, cols, cells })
    }

    /// Parse an ASCII layout: `#` is a wall, `.` is open floor. Blank lines are ignored.
    pub fn parse(layout: &str) -> Result<Self, BoundaryError> {
        let lines: Vec<&str> = layout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let rows = lines.len();
        let cols = lines.first().map_or(0, |line| line.chars().count());
        if rows == 0 || cols == 0 {
            return Err(BoundaryError::EmptyDimensions { rows, cols });
        }

        let mut cells = Vec::with_capacity(rows * cols);
        for (row, line) in lines.iter().enumerate() {
            let actual = line.chars().count();
            if actual != cols {
                return Err(BoundaryError::RaggedRow {
                    row,
                    expected: cols,
                    actual,
                });
            }
            for (col, ch) in line.chars().enumerate() {
                match ch {
                    '#' => cells.push(true),
                    '.' => cells.push(false),
                    found => return Err(BoundaryError::UnknownCell { row, col, found }),
                }
            }
        }
        Ok(Self { rows, cols, cells })
    }

    /// `(rows, cols)` of the grid.
    #[must_use]
    pub const fn dimensions(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the cell blocks movement. Cells outside the grid count as walls.
    #[must_use]
    pub fn is_wall(&self, row: usize, col: usize) -> bool {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col]
        } else {
            true
        }
    }

    /// Y coordinate of the bottom wall row (`rows - 1`).
    #[must_use]
    pub fn vertical_extent(&self) -> f64 {
        (self.rows - 1) as f64
    }

    /// Iterator over `(row, col)` of every wall cell.
    pub fn walls(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, wall)| **wall)
            .map(|(idx, _)| (idx / self.cols, idx % self.cols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_has_four_walls() {
        let map = BoundaryMap::room(10, 10).expect("room");
        assert_eq!(map.dimensions(), (10, 10));
        for i in 0..10 {
            assert!(map.is_wall(0, i));
            assert!(map.is_wall(9, i));
            assert!(map.is_wall(i, 0));
            assert!(map.is_wall(i, 9));
        }
        assert!(!map.is_wall(5, 5));
        assert_eq!(map.walls().count(), 36);
    }

    #[test]
    fn corridor_leaves_ends_open() {
        let map = BoundaryMap::corridor(5, 20).expect("corridor");
        assert!(map.is_wall(0, 0));
        assert!(map.is_wall(4, 19));
        assert!(!map.is_wall(2, 0));
        assert!(!map.is_wall(2, 19));
        assert_eq!(map.vertical_extent(), 4.0);
    }

    #[test]
    fn out_of_range_cells_are_walls() {
        let map = BoundaryMap::corridor(3, 3).expect("corridor");
        assert!(map.is_wall(3, 1));
        assert!(map.is_wall(1, 7));
    }

    #[test]
    fn parse_reads_ascii_layout() {
        let map = BoundaryMap::parse(
            "
            #####
            #...#
            #####
            ",
        )
        .expect("layout");
        assert_eq!(map.dimensions(), (3, 5));
        assert!(!map.is_wall(1, 2));
        assert!(map.is_wall(1, 0));
    }

    #[test]
    fn construction_rejects_bad_input() {
        assert_eq!(
            BoundaryMap::room(0, 4),
            Err(BoundaryError::EmptyDimensions { rows: 0, cols: 4 })
        );
        assert_eq!(
            BoundaryMap::from_cells(2, 2, vec![true; 3]),
            Err(BoundaryError::CellCount {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            BoundaryMap::parse("###\n##"),
            Err(BoundaryError::RaggedRow {
                row: 1,
                expected: 3,
                actual: 2
            })
        );
        assert!(matches!(
            BoundaryMap::parse("#x#"),
            Err(BoundaryError::UnknownCell { found: 'x', .. })
        ));
    }
}
