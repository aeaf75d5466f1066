//! Run summaries and conversion of committed segments into the output
//! route map.

use crate::grid::{GridGraph, RoutingGrid};
use crate::net::{NetArena, NetStatus};
use crate::region_query::{Shape, shapes_for_path};
use crate::worker::Worker;
use eda_common::db::indices::NetId;
use eda_common::db::route::{NetRoute, PinAnchor, RouteMap, ViaPlacement, WireSegment};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterationStats {
    pub iteration: usize,
    pub overflowed_edges: usize,
    pub total_overflow: u64,
    /// Nets ripped up in the reroute pass that led to this state.
    pub ripped: usize,
    pub unresolved: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    BudgetExhausted,
    OverflowIncreasing,
    Deadline,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CongestionSummary {
    pub overflowed_edges: usize,
    pub total_overflow: u64,
    pub max_overflow: u32,
    pub worst_utilization: f64,
    /// Planar demand in gcell steps.
    pub wirelength: u64,
    pub vias: u64,
}

impl CongestionSummary {
    pub fn from_grid(grid: &GridGraph) -> Self {
        let mut s = CongestionSummary::default();
        for edge in grid.edges() {
            let overflow = grid.overflow(edge);
            if overflow > 0 {
                s.overflowed_edges += 1;
                s.total_overflow += overflow as u64;
                s.max_overflow = s.max_overflow.max(overflow);
            }
            let demand = grid.raw_demand(edge) as u64;
            if edge.dir.is_via() {
                s.vias += demand;
            } else {
                s.wirelength += demand;
            }
        }
        s.worst_utilization = grid.max_utilization();
        s
    }
}

#[derive(Clone, Debug)]
pub struct RouteReport {
    pub nets_total: usize,
    pub routed: usize,
    pub trivial: usize,
    pub feed_through: usize,
    pub malformed: Vec<(NetId, String)>,
    /// Nets left without a complete route, with the last failure.
    pub unroutable: Vec<(NetId, String)>,
    pub iterations: usize,
    pub stop_reason: StopReason,
    /// False when overflow remains and residual overflow is not allowed.
    pub accepted: bool,
    pub summary: CongestionSummary,
    pub best_iteration: usize,
    pub history: Vec<IterationStats>,
}

impl RouteReport {
    pub fn converged(&self) -> bool {
        self.stop_reason == StopReason::Converged
    }

    pub fn log(&self) {
        log::info!(
            "Routing stopped after {} iter(s) ({:?}): {}/{} routed, {} trivial, {} feed-through",
            self.iterations,
            self.stop_reason,
            self.routed,
            self.nets_total,
            self.trivial,
            self.feed_through
        );
        log::info!(
            "Overflow: {} edges, total {}, max {}; worst utilisation {:.2}; wirelength {}, vias {}",
            self.summary.overflowed_edges,
            self.summary.total_overflow,
            self.summary.max_overflow,
            self.summary.worst_utilization,
            self.summary.wirelength,
            self.summary.vias
        );
        for (net, why) in self.malformed.iter().take(10) {
            log::warn!("Malformed {:?}: {}", net, why);
        }
        for (net, why) in self.unroutable.iter().take(10) {
            log::warn!("Unroutable {:?}: {}", net, why);
        }
        if !self.accepted {
            log::error!(
                "Residual overflow of {} remains and is not allowed by the configuration",
                self.summary.total_overflow
            );
        }
    }
}

/// Wires and vias of every routed or feed-through net, in database units.
///
/// Each straight run of a segment becomes one wire between gcell centres.
/// Terminals whose access layer differs from their routing node get a via
/// stack at the node.
pub fn build_route_map(nets: &NetArena, worker: &Worker, via_names: &[String]) -> RouteMap {
    let converter = worker.converter();
    let via_name = |lower: u8| {
        via_names
            .get(lower as usize)
            .cloned()
            .unwrap_or_else(|| format!("VIA{}{}", lower + 1, lower + 2))
    };

    let mut map = RouteMap::new();
    for net in nets.iter() {
        if !matches!(
            net.status,
            NetStatus::Routed | NetStatus::Final | NetStatus::FeedThrough
        ) {
            continue;
        }
        let mut route = NetRoute {
            name: net.name.clone(),
            ..Default::default()
        };

        for &id in worker.net_segments(net.id) {
            let Some(segment) = worker.segment(id) else {
                continue;
            };
            for shape in shapes_for_path(&segment.path, converter, 0) {
                match shape {
                    Shape::PathSegment { layer, rect } => route.wires.push(WireSegment {
                        start_x: rect.min.x,
                        start_y: rect.min.y,
                        start_layer: layer,
                        end_x: rect.max.x,
                        end_y: rect.max.y,
                        end_layer: layer,
                    }),
                    Shape::Via { lower_layer, at, .. } => route.vias.push(ViaPlacement {
                        x: at.x,
                        y: at.y,
                        lower_layer,
                        name: via_name(lower_layer),
                    }),
                    Shape::Patch { .. } => {}
                }
            }
        }

        for pin in &net.pins {
            let at = converter.to_world(pin.node);
            let (lo, hi) = (
                pin.access.layer.min(pin.node.z),
                pin.access.layer.max(pin.node.z),
            );
            for lower in lo..hi {
                route.vias.push(ViaPlacement {
                    x: at.x,
                    y: at.y,
                    lower_layer: lower,
                    name: via_name(lower),
                });
            }
            route.anchors.push(PinAnchor {
                x: at.x,
                y: at.y,
                layer: pin.node.z,
            });
        }
        route.vias.sort_by_key(|v| (v.x, v.y, v.lower_layer));
        route.vias.dedup();
        map.insert(net.id, route);
    }
    map
}
