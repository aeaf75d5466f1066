use super::{EdgeDir, GridEdge, RoutingGrid};
use eda_common::db::core::LayerDirection;
use eda_common::db::route::{CongestionCell, CongestionSink};
use eda_common::geom::coord::GridCoord;

/// Capacity used for via edges; vias are not a scarce resource at this level.
pub const VIA_CAPACITY: u32 = u16::MAX as u32;

// Packed per-edge state (8 bytes)
#[derive(Clone, Copy, Default, Debug)]
struct EdgeState {
    capacity: u16,
    demand: u16,
    history: f32,
}

/// Dense 3-D capacitated grid. Each node owns its East, North and Up edges.
///
/// A graph may be a view of a larger one (see [`GridGraph::extract`]): it then
/// covers `[origin.x, origin.x + width) x [origin.y, origin.y + height)` and
/// accepts global coordinates only inside that window.
#[derive(Clone, Debug)]
pub struct GridGraph {
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
    layers: u8,
    edges: Vec<EdgeState>,
    directions: Vec<LayerDirection>,
    congestion_threshold: f64,
    history_epoch: u64,
}

impl GridGraph {
    pub fn new(width: u32, height: u32, layers: u8, directions: Vec<LayerDirection>) -> Self {
        let size = (width as usize) * (height as usize) * (layers as usize);

        if size > 500_000_000 {
            log::warn!(
                "Allocating large GridGraph: {} nodes. Ensure sufficient RAM.",
                size
            );
        }

        let mut directions = directions;
        directions.resize(layers as usize, LayerDirection::Unknown);

        Self {
            x0: 0,
            y0: 0,
            width,
            height,
            layers,
            edges: vec![EdgeState::default(); size * 3],
            directions,
            congestion_threshold: 1.0,
            history_epoch: 0,
        }
    }

    pub fn set_congestion_threshold(&mut self, threshold: f64) {
        self.congestion_threshold = threshold;
    }

    pub fn congestion_threshold(&self) -> f64 {
        self.congestion_threshold
    }

    pub fn node_count(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.layers as usize)
    }

    /// Dense index of a node inside this graph. Inverse of [`GridGraph::coord`].
    #[inline(always)]
    pub fn index(&self, c: GridCoord) -> usize {
        let lx = (c.x - self.x0) as usize;
        let ly = (c.y - self.y0) as usize;
        (c.z as usize) * (self.width as usize) * (self.height as usize)
            + ly * (self.width as usize)
            + lx
    }

    #[inline(always)]
    pub fn coord(&self, idx: usize) -> GridCoord {
        let plane = (self.width as usize) * (self.height as usize);
        let z = (idx / plane) as u8;
        let rem = idx % plane;
        GridCoord::new(
            (rem % self.width as usize) as u32 + self.x0,
            (rem / self.width as usize) as u32 + self.y0,
            z,
        )
    }

    #[inline(always)]
    fn slot(&self, edge: GridEdge) -> Option<usize> {
        if self.contains(edge.from) && self.contains(edge.to()) {
            Some(self.index(edge.from) * 3 + edge.dir.slot())
        } else {
            None
        }
    }

    pub fn set_capacity(&mut self, edge: GridEdge, capacity: u32) {
        if let Some(s) = self.slot(edge) {
            self.edges[s].capacity = capacity.min(u16::MAX as u32) as u16;
        }
    }

    /// Every edge whose two endpoints lie inside this graph.
    pub fn edges(&self) -> impl Iterator<Item = GridEdge> + '_ {
        (0..self.node_count()).flat_map(move |i| {
            let c = self.coord(i);
            EdgeDir::ALL
                .into_iter()
                .map(move |d| GridEdge::new(c, d))
                .filter(move |e| self.contains(e.to()))
        })
    }

    #[inline(always)]
    fn threshold_capacity(&self, capacity: u16) -> u32 {
        (capacity as f64 * self.congestion_threshold).floor() as u32
    }

    /// Demand above the congestion threshold; zero when not overflowed.
    pub fn overflow(&self, edge: GridEdge) -> u32 {
        match self.slot(edge) {
            Some(s) => {
                let e = self.edges[s];
                (e.demand as u32).saturating_sub(self.threshold_capacity(e.capacity))
            }
            None => 0,
        }
    }

    pub fn utilization(&self, edge: GridEdge) -> f64 {
        let cap = self.capacity(edge);
        let demand = self.raw_demand(edge);
        if cap == 0 {
            if demand > 0 { f64::INFINITY } else { 0.0 }
        } else {
            demand as f64 / cap as f64
        }
    }

    pub fn overflowed_edges(&self) -> Vec<GridEdge> {
        self.edges().filter(|&e| self.is_overflowed(e)).collect()
    }

    pub fn total_overflow(&self) -> u64 {
        self.edges().map(|e| self.overflow(e) as u64).sum()
    }

    pub fn total_demand(&self) -> u64 {
        self.edges.iter().map(|e| e.demand as u64).sum()
    }

    pub fn max_utilization(&self) -> f64 {
        self.edges()
            .filter(|e| !e.dir.is_via())
            .map(|e| self.utilization(e))
            .fold(0.0, f64::max)
    }

    /// Bumped whenever history costs change.
    pub fn history_epoch(&self) -> u64 {
        self.history_epoch
    }

    /// Adds `increment * (overflow + 1)` history to every overflowed edge.
    pub fn update_history(&mut self, increment: f64) -> usize {
        let overflowed = self.overflowed_edges();
        for &e in &overflowed {
            let amount = increment * (self.overflow(e) as f64 + 1.0);
            self.add_history_cost(e, amount);
        }
        self.history_epoch += 1;
        overflowed.len()
    }

    /// Copies the window `[x_lo, x_hi] x [y_lo, y_hi]` (inclusive, global
    /// coordinates) into an independent graph.
    pub fn extract(&self, x_lo: u32, y_lo: u32, x_hi: u32, y_hi: u32) -> GridGraph {
        let x_lo = x_lo.max(self.x0);
        let y_lo = y_lo.max(self.y0);
        let x_hi = x_hi.min(self.x0 + self.width - 1);
        let y_hi = y_hi.min(self.y0 + self.height - 1);
        let width = x_hi - x_lo + 1;
        let height = y_hi - y_lo + 1;

        let mut view = GridGraph {
            x0: x_lo,
            y0: y_lo,
            width,
            height,
            layers: self.layers,
            edges: vec![EdgeState::default(); (width * height) as usize * self.layers as usize * 3],
            directions: self.directions.clone(),
            congestion_threshold: self.congestion_threshold,
            history_epoch: self.history_epoch,
        };
        for z in 0..self.layers {
            for y in y_lo..=y_hi {
                for x in x_lo..=x_hi {
                    let c = GridCoord::new(x, y, z);
                    let src = self.index(c) * 3;
                    let dst = view.index(c) * 3;
                    view.edges[dst..dst + 3].copy_from_slice(&self.edges[src..src + 3]);
                }
            }
        }
        view
    }

    /// Streams per-cell supply and usage to `sink`.
    pub fn report_congestion(&self, sink: &mut dyn CongestionSink) {
        for i in 0..self.node_count() {
            let c = self.coord(i);
            let h = GridEdge::new(c, EdgeDir::East);
            let v = GridEdge::new(c, EdgeDir::North);
            sink.report(CongestionCell {
                x: c.x,
                y: c.y,
                layer: c.z,
                horizontal_capacity: self.capacity(h),
                vertical_capacity: self.capacity(v),
                horizontal_usage: self.raw_demand(h),
                vertical_usage: self.raw_demand(v),
            });
        }
    }
}

impl RoutingGrid for GridGraph {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn layers(&self) -> u8 {
        self.layers
    }
    fn origin(&self) -> (u32, u32) {
        (self.x0, self.y0)
    }

    fn layer_direction(&self, layer: u8) -> LayerDirection {
        self.directions
            .get(layer as usize)
            .copied()
            .unwrap_or(LayerDirection::Unknown)
    }

    #[inline(always)]
    fn capacity(&self, edge: GridEdge) -> u32 {
        self.slot(edge).map_or(0, |s| self.edges[s].capacity as u32)
    }

    #[inline(always)]
    fn raw_demand(&self, edge: GridEdge) -> u32 {
        self.slot(edge).map_or(0, |s| self.edges[s].demand as u32)
    }

    #[inline(always)]
    fn history_cost(&self, edge: GridEdge) -> f64 {
        self.slot(edge).map_or(0.0, |s| self.edges[s].history as f64)
    }

    fn add_demand(&mut self, edge: GridEdge) {
        match self.slot(edge) {
            Some(s) => {
                let e = &mut self.edges[s];
                e.demand = e.demand.saturating_add(1);
            }
            None => log::warn!("add_demand on edge {:?} outside the grid", edge),
        }
    }

    fn subtract_demand(&mut self, edge: GridEdge) {
        match self.slot(edge) {
            Some(s) => {
                let e = &mut self.edges[s];
                if e.demand == 0 {
                    log::warn!("Demand underflow on edge {:?}; clamped at zero", edge);
                } else {
                    e.demand -= 1;
                }
            }
            None => log::warn!("subtract_demand on edge {:?} outside the grid", edge),
        }
    }

    #[inline(always)]
    fn is_overflowed(&self, edge: GridEdge) -> bool {
        match self.slot(edge) {
            Some(s) => {
                let e = self.edges[s];
                e.demand as f64 > e.capacity as f64 * self.congestion_threshold
            }
            None => false,
        }
    }

    fn add_history_cost(&mut self, edge: GridEdge, amount: f64) {
        if let Some(s) = self.slot(edge) {
            self.edges[s].history += amount as f32;
        }
    }

    fn decay_history_cost(&mut self, factor: f64) {
        let factor = factor as f32;
        for e in &mut self.edges {
            if e.history > 0.0 {
                e.history *= factor;
            }
        }
        self.history_epoch += 1;
    }
}
