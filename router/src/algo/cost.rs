use crate::grid::{GridEdge, RoutingGrid};
use eda_common::db::core::LayerDirection;
use eda_common::geom::coord::GridCoord;
use eda_common::util::config::RoutingConfig;

/// Costs are carried as integers in hundredths of a unit wire step.
pub const COST_SCALE: f64 = 100.0;

/// Edge pricing: `base + congestion_penalty + history`.
///
/// The congestion penalty is zero up to `knee` utilisation, rises
/// quadratically to `cost_height` at full utilisation and then grows by
/// `overflow_slope` per unit of demand past capacity.
#[derive(Clone, Debug)]
pub struct CostModel {
    via_cost: f64,
    wrong_way_cost: f64,
    knee: f64,
    cost_height: f64,
    overflow_slope: f64,
    threshold: f64,
    hard_capacity: bool,
}

impl CostModel {
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            via_cost: config.via_cost,
            wrong_way_cost: config.wrong_way_cost,
            knee: config.congestion_knee,
            cost_height: config.congestion_cost_height,
            overflow_slope: config.overflow_slope,
            threshold: config.congestion_threshold,
            hard_capacity: false,
        }
    }

    /// Same pricing, but edges that would overflow become impassable.
    pub fn hard(&self) -> Self {
        Self {
            hard_capacity: true,
            ..self.clone()
        }
    }

    pub fn is_hard(&self) -> bool {
        self.hard_capacity
    }

    pub fn congestion_penalty(&self, demand_after: u32, capacity: u32) -> f64 {
        if capacity == 0 {
            return f64::INFINITY;
        }
        let util = demand_after as f64 / capacity as f64;
        if util <= self.knee {
            0.0
        } else if util <= 1.0 {
            let t = (util - self.knee) / (1.0 - self.knee);
            self.cost_height * t * t
        } else {
            self.cost_height + self.overflow_slope * (demand_after - capacity) as f64
        }
    }

    fn would_overflow(&self, demand: u32, capacity: u32) -> bool {
        (demand + 1) as f64 > capacity as f64 * self.threshold
    }

    /// Price of using `edge` once more, or `None` if it cannot be used.
    pub fn edge_cost<G: RoutingGrid + ?Sized>(&self, grid: &G, edge: GridEdge) -> Option<i64> {
        let capacity = grid.capacity(edge);
        if capacity == 0 {
            return None;
        }
        let demand = grid.raw_demand(edge);
        if self.hard_capacity && self.would_overflow(demand, capacity) {
            return None;
        }

        let base = if edge.dir.is_via() {
            self.via_cost
        } else {
            let horizontal = edge.from.y == edge.to().y;
            match grid.layer_direction(edge.from.z) {
                LayerDirection::Horizontal if !horizontal => 1.0 + self.wrong_way_cost,
                LayerDirection::Vertical if horizontal => 1.0 + self.wrong_way_cost,
                _ => 1.0,
            }
        };
        let total = base + self.congestion_penalty(demand + 1, capacity) + grid.history_cost(edge);
        Some((total * COST_SCALE).round() as i64)
    }

    /// Admissible per-step lower bounds `(planar, via)` for the search heuristic.
    pub fn step_bounds(&self) -> (i64, i64) {
        (COST_SCALE as i64, (self.via_cost * COST_SCALE).floor().max(0.0) as i64)
    }

    /// Sum of edge costs along `path`; `None` if a step is not a usable edge.
    pub fn path_cost<G: RoutingGrid + ?Sized>(&self, grid: &G, path: &[GridCoord]) -> Option<i64> {
        path.windows(2).try_fold(0i64, |acc, w| {
            let edge = GridEdge::between(w[0], w[1])?;
            Some(acc + self.edge_cost(grid, edge)?)
        })
    }

    /// True when committing `path` would push one of its edges past the threshold.
    pub fn path_overflows<G: RoutingGrid + ?Sized>(&self, grid: &G, path: &[GridCoord]) -> bool {
        path.windows(2).any(|w| match GridEdge::between(w[0], w[1]) {
            Some(e) => self.would_overflow(grid.raw_demand(e), grid.capacity(e)),
            None => false,
        })
    }
}
