pub mod capacity;
pub mod dense;

pub use dense::GridGraph;

use eda_common::db::core::LayerDirection;
use eda_common::geom::coord::GridCoord;

/// Direction of a grid edge, always pointing away from its lower endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeDir {
    /// Towards +x.
    East,
    /// Towards +y.
    North,
    /// Towards the next layer up (a via).
    Up,
}

impl EdgeDir {
    pub const ALL: [EdgeDir; 3] = [EdgeDir::East, EdgeDir::North, EdgeDir::Up];

    #[inline(always)]
    pub fn slot(self) -> usize {
        match self {
            EdgeDir::East => 0,
            EdgeDir::North => 1,
            EdgeDir::Up => 2,
        }
    }

    pub fn is_via(self) -> bool {
        self == EdgeDir::Up
    }
}

/// An edge stored once, at its lower endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridEdge {
    pub from: GridCoord,
    pub dir: EdgeDir,
}

impl GridEdge {
    pub fn new(from: GridCoord, dir: EdgeDir) -> Self {
        Self { from, dir }
    }

    /// The canonical edge joining two adjacent nodes, in either order.
    pub fn between(a: GridCoord, b: GridCoord) -> Option<GridEdge> {
        let (lo, hi) = if (a.z, a.y, a.x) <= (b.z, b.y, b.x) { (a, b) } else { (b, a) };
        if lo.y == hi.y && lo.z == hi.z && lo.x + 1 == hi.x {
            Some(GridEdge::new(lo, EdgeDir::East))
        } else if lo.x == hi.x && lo.z == hi.z && lo.y + 1 == hi.y {
            Some(GridEdge::new(lo, EdgeDir::North))
        } else if lo.x == hi.x && lo.y == hi.y && lo.z + 1 == hi.z {
            Some(GridEdge::new(lo, EdgeDir::Up))
        } else {
            None
        }
    }

    pub fn to(&self) -> GridCoord {
        let f = self.from;
        match self.dir {
            EdgeDir::East => GridCoord::new(f.x + 1, f.y, f.z),
            EdgeDir::North => GridCoord::new(f.x, f.y + 1, f.z),
            EdgeDir::Up => GridCoord::new(f.x, f.y, f.z + 1),
        }
    }
}

/// Inclusive rectangle of gcells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridBox {
    pub x_lo: u32,
    pub y_lo: u32,
    pub x_hi: u32,
    pub y_hi: u32,
}

impl GridBox {
    pub fn new(x_lo: u32, y_lo: u32, x_hi: u32, y_hi: u32) -> Self {
        Self { x_lo, y_lo, x_hi, y_hi }
    }

    pub fn around(points: &[GridCoord]) -> Option<GridBox> {
        let first = points.first()?;
        let mut b = GridBox::new(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            b.x_lo = b.x_lo.min(p.x);
            b.y_lo = b.y_lo.min(p.y);
            b.x_hi = b.x_hi.max(p.x);
            b.y_hi = b.y_hi.max(p.y);
        }
        Some(b)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_lo && x <= self.x_hi && y >= self.y_lo && y <= self.y_hi
    }

    pub fn contains_box(&self, other: &GridBox) -> bool {
        self.contains(other.x_lo, other.y_lo) && self.contains(other.x_hi, other.y_hi)
    }

    pub fn intersects(&self, other: &GridBox) -> bool {
        self.x_lo <= other.x_hi
            && other.x_lo <= self.x_hi
            && self.y_lo <= other.y_hi
            && other.y_lo <= self.y_hi
    }

    pub fn center(&self) -> (u32, u32) {
        ((self.x_lo + self.x_hi) / 2, (self.y_lo + self.y_hi) / 2)
    }

    pub fn expanded(&self, margin: u32, width: u32, height: u32) -> GridBox {
        GridBox::new(
            self.x_lo.saturating_sub(margin),
            self.y_lo.saturating_sub(margin),
            (self.x_hi + margin).min(width - 1),
            (self.y_hi + margin).min(height - 1),
        )
    }
}

/// Capacitated routing resource seen by the searcher and the controller.
pub trait RoutingGrid: Sync + Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn layers(&self) -> u8;

    /// Lowest (x, y) covered; non-zero for a tile view of a larger grid.
    fn origin(&self) -> (u32, u32) {
        (0, 0)
    }

    fn contains(&self, c: GridCoord) -> bool {
        let (x0, y0) = self.origin();
        c.x >= x0
            && c.y >= y0
            && c.x < x0 + self.width()
            && c.y < y0 + self.height()
            && c.z < self.layers()
    }

    fn capacity(&self, edge: GridEdge) -> u32;
    fn raw_demand(&self, edge: GridEdge) -> u32;
    fn history_cost(&self, edge: GridEdge) -> f64;

    fn add_demand(&mut self, edge: GridEdge);
    fn subtract_demand(&mut self, edge: GridEdge);

    fn is_overflowed(&self, edge: GridEdge) -> bool;

    fn add_history_cost(&mut self, edge: GridEdge, amount: f64);
    fn decay_history_cost(&mut self, factor: f64);

    fn layer_direction(&self, _layer: u8) -> LayerDirection {
        LayerDirection::Unknown
    }

    fn is_blocked(&self, edge: GridEdge) -> bool {
        self.capacity(edge) == 0
    }
}
