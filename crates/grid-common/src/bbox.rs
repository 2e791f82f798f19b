//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Build from an archive "area" quadruple ordered `[north, west, south, east]`.
    pub fn from_area(area: [f64; 4]) -> Self {
        let [north, west, south, east] = area;
        Self::new(west, south, east, north)
    }

    /// The `[north, west, south, east]` quadruple used by reanalysis archives.
    pub fn to_area(&self) -> [f64; 4] {
        [self.max_y, self.min_x, self.min_y, self.max_x]
    }

    /// Width of the bounding box in degrees.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Height of the bounding box in degrees.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether the box has positive extent on both axes.
    pub fn is_valid(&self) -> bool {
        self.max_x >= self.min_x && self.max_y >= self.min_y
    }

    /// Check if a point lies within the box (edges inclusive).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_round_trip_order() {
        // Ecuador request area: north 2, west -82, south -6, east -74
        let bbox = BoundingBox::from_area([2.0, -82.0, -6.0, -74.0]);
        assert_eq!(bbox.min_x, -82.0);
        assert_eq!(bbox.max_y, 2.0);
        assert_eq!(bbox.to_area(), [2.0, -82.0, -6.0, -74.0]);
        assert_eq!(bbox.width(), 8.0);
        assert!(bbox.contains(-78.0, 0.0));
        assert!(!bbox.contains(-70.0, 0.0));
    }
}
