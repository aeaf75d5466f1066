use serde::{Deserialize, Serialize};

/// A node of the routing grid: gcell column, gcell row and routing layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

impl GridCoord {
    pub fn new(x: u32, y: u32, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn with_layer(self, z: u8) -> Self {
        Self { z, ..self }
    }

    /// Planar Manhattan distance, ignoring the layer.
    pub fn planar_distance(&self, other: &GridCoord) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    pub fn layer_distance(&self, other: &GridCoord) -> u32 {
        self.z.abs_diff(other.z) as u32
    }

    pub fn same_cell(&self, other: &GridCoord) -> bool {
        self.x == other.x && self.y == other.y
    }
}
