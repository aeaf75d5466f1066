//! Rip-up and reroute control loop.
//!
//! `Init` routes every net once. Each round then `Evaluate`s the grid,
//! `Select`s the nets crossing overflowed edges (and, in `all` mode, every
//! net in a congested tile), and `Reroute`s them: all selected nets are
//! ripped up before any is routed again. History cost accumulates on
//! overflowed edges between rounds; in `drc` mode it also decays after
//! every reroute, while `all` mode keeps it purely additive.

use crate::algo::cost::CostModel;
use crate::error::RouteError;
use crate::grid::capacity::{build_grid, routing_layer_range};
use crate::grid::{GridBox, GridEdge, GridGraph, RoutingGrid};
use crate::net::{NetArena, NetState, NetStatus, PinAccess};
use crate::report::{CongestionSummary, IterationStats, RouteReport, StopReason, build_route_map};
use crate::topology::{NetShape, build_topology};
use crate::utils::conversion::GridConverter;
use crate::worker::{
    Connection, FailReason, JobResult, NetJob, SearchPolicy, Tile, Worker, partition,
    schedule_batches,
};
use eda_common::db::core::{AccessPoint, NetlistProvider};
use eda_common::db::indices::{NetId, TileId};
use eda_common::db::route::{CongestionSink, RouteMap};
use eda_common::db::tech::TechnologyProvider;
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::util::config::{RipupGranularity, RipupMode, RoutingConfig};
use eda_common::util::profiler::ScopedTimer;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Evaluate,
    Select,
    Reroute,
    Done,
}

/// What to tear down for one selected net.
#[derive(Clone, Debug, PartialEq, Eq)]
enum RipScope {
    Net,
    /// Only the segments using one of these edges.
    Edges(Vec<GridEdge>),
}

pub struct CongestionController {
    config: RoutingConfig,
    cost: CostModel,
    global: Worker,
    tiles: Vec<Tile>,
    batches: Vec<Vec<TileId>>,
    nets: NetArena,
    via_names: Vec<String>,
    rng: StdRng,
    phase: Phase,
    iteration: usize,
    selected: Vec<(NetId, RipScope)>,
    last_ripped: usize,
    history: Vec<IterationStats>,
    dirty: BTreeSet<NetId>,
    /// Nets with no path at all under the current capacities.
    dead: BTreeSet<NetId>,
    deadline: Option<Instant>,
    best: Option<(usize, u64)>,
    overflow_increases: usize,
    stop_reason: Option<StopReason>,
    accepted: bool,
}

impl CongestionController {
    /// Builds the grid, snaps every terminal and classifies every net.
    /// Only configuration problems are errors; bad nets are recorded.
    pub fn new<N, T>(
        netlist: &N,
        tech: &T,
        die_area: &Rect,
        config: &RoutingConfig,
    ) -> Result<Self, RouteError>
    where
        N: NetlistProvider + ?Sized,
        T: TechnologyProvider + ?Sized,
    {
        config.validate()?;
        if die_area.is_empty() {
            return Err(RouteError::EmptyDie(*die_area));
        }
        let (min_layer, max_layer) = routing_layer_range(config, tech.num_layers())?;
        let converter = GridConverter::new(die_area, config.gcell_size);
        let grid = build_grid(tech, &converter, config)?;
        let (w, h) = (grid.width(), grid.height());
        let via_names = (0..grid.layers().saturating_sub(1))
            .map(|l| tech.via_name(l))
            .collect();

        let mut global = Worker::new(grid, converter);
        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let mut nets = NetArena::default();

        for id in netlist.net_ids() {
            let mut state = NetState::new(id, netlist.net_name(id).to_string());
            match snap_terminals(netlist, id, &converter, (min_layer, max_layer)) {
                Err(problem) => {
                    log::warn!("Net '{}' skipped: {}", state.name, problem);
                    state.status = NetStatus::Malformed;
                    state.problem = Some(problem);
                }
                Ok(pins) => {
                    let nodes: Vec<GridCoord> = pins.iter().map(|p| p.node).collect();
                    state.bbox = GridBox::around(&nodes);
                    state.pins = pins;
                    let shape =
                        build_topology(&nodes, netlist.driver(id), config.topology_root, &mut rng);
                    match shape {
                        NetShape::Trivial => state.status = NetStatus::Trivial,
                        NetShape::FeedThrough(pos) => {
                            state.status = NetStatus::FeedThrough;
                            state.marker = Some(pos);
                            global.place_marker(id, pos);
                        }
                        NetShape::Tree(topology) => state.topology = Some(topology),
                    }
                }
            }
            nets.push(state);
        }

        let tiles = partition(w, h, config.tile_size, config.tile_halo);
        let batches = schedule_batches(&tiles);
        log::info!(
            "{} nets, {} tiles in {} batch(es)",
            nets.len(),
            tiles.len(),
            batches.len()
        );

        Ok(Self {
            config: config.clone(),
            cost: CostModel::from_config(config),
            global,
            tiles,
            batches,
            nets,
            via_names,
            rng,
            phase: Phase::Init,
            iteration: 0,
            selected: Vec::new(),
            last_ripped: 0,
            history: Vec::new(),
            dirty: BTreeSet::new(),
            dead: BTreeSet::new(),
            deadline: None,
            best: None,
            overflow_increases: 0,
            stop_reason: None,
            accepted: false,
        })
    }

    pub fn run(&mut self) -> RouteReport {
        while self.step() {}
        self.report()
    }

    /// Advances the state machine by one phase. Returns false once done.
    pub fn step(&mut self) -> bool {
        match self.phase {
            Phase::Init => {
                let _timer = ScopedTimer::new("Initial routing");
                self.deadline = self
                    .config
                    .time_budget_secs
                    .map(|s| Instant::now() + Duration::from_secs(s));
                let pending = self.nets.ids_with(NetStatus::Pending);
                self.route_nets(&pending, false);
                self.phase = Phase::Evaluate;
            }
            Phase::Evaluate => {
                self.phase = match self.evaluate() {
                    Some(reason) => {
                        self.finish(reason);
                        Phase::Done
                    }
                    None => Phase::Select,
                };
            }
            Phase::Select => {
                self.selected = self.select();
                self.phase = Phase::Reroute;
            }
            Phase::Reroute => {
                let _timer = ScopedTimer::new(format!("GR Iter {} reroute", self.iteration + 1));
                let selected = std::mem::take(&mut self.selected);
                self.last_ripped = self.rip_up_selected(&selected);
                let ids: Vec<NetId> = selected.iter().map(|(n, _)| *n).collect();
                self.route_nets(&ids, true);
                if self.config.ripup_mode == RipupMode::Drc {
                    self.global.grid_mut().decay_history_cost(self.config.history_decay);
                }
                self.iteration += 1;
                self.phase = Phase::Evaluate;
            }
            Phase::Done => return false,
        }
        true
    }

    fn evaluate(&mut self) -> Option<StopReason> {
        let grid = self.global.grid();
        let overflowed_edges = grid.overflowed_edges().len();
        let total_overflow = grid.total_overflow();
        let unresolved = self.retryable_unresolved().len();

        log::info!(
            "GR Iter {}: Overflow: {} ({} edges), Ripped: {}, Unresolved: {}, Max util: {:.2}",
            self.iteration,
            total_overflow,
            overflowed_edges,
            self.last_ripped,
            unresolved,
            grid.max_utilization()
        );

        if let Some(prev) = self.history.last() {
            if total_overflow > prev.total_overflow {
                self.overflow_increases += 1;
            }
        }
        if self.best.is_none_or(|(_, best)| total_overflow < best) {
            self.best = Some((self.iteration, total_overflow));
        }
        self.history.push(IterationStats {
            iteration: self.iteration,
            overflowed_edges,
            total_overflow,
            ripped: self.last_ripped,
            unresolved,
        });

        if overflowed_edges == 0 && unresolved == 0 {
            Some(StopReason::Converged)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(StopReason::Deadline)
        } else if self.iteration >= self.config.overflow_iteration_budget {
            Some(StopReason::BudgetExhausted)
        } else if self.overflow_increases > self.config.max_overflow_increases {
            Some(StopReason::OverflowIncreasing)
        } else {
            None
        }
    }

    fn finish(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        let overflow = self.global.grid().total_overflow();
        self.accepted = overflow == 0 || self.config.allow_residual_overflow;
        match reason {
            StopReason::Converged => {
                log::info!("Congestion resolved after {} iteration(s)", self.iteration)
            }
            _ => log::warn!(
                "Stopping with residual overflow {} ({:?}); best was iteration {}",
                overflow,
                reason,
                self.best.map_or(0, |(i, _)| i)
            ),
        }
        if self.accepted {
            for id in self.nets.ids_with(NetStatus::Routed) {
                self.nets.get_mut(id).status = NetStatus::Final;
            }
        }
    }

    /// Charges history to overflowed edges and picks the nets to reroute, in
    /// seeded random order.
    fn select(&mut self) -> Vec<(NetId, RipScope)> {
        let overflowed = self.global.grid().overflowed_edges();
        self.global.grid_mut().update_history(self.config.history_increment);

        let mut chosen: BTreeMap<NetId, RipScope> = BTreeMap::new();
        for &edge in &overflowed {
            for (net, _) in self.global.nets_using_edge(edge) {
                match chosen.entry(net).or_insert_with(|| RipScope::Edges(Vec::new())) {
                    RipScope::Edges(edges) => edges.push(edge),
                    RipScope::Net => {}
                }
            }
        }

        if self.config.ripup_mode == RipupMode::All {
            let congested: Vec<GridBox> = self
                .tiles
                .iter()
                .filter(|t| overflowed.iter().any(|e| t.core.contains(e.from.x, e.from.y)))
                .map(|t| t.core)
                .collect();
            for core in &congested {
                for net in self.global.nets_in_box(core) {
                    chosen.insert(net, RipScope::Net);
                }
            }
        }

        for net in self.retryable_unresolved() {
            chosen.entry(net).or_insert_with(|| RipScope::Edges(Vec::new()));
        }

        let mut selected: Vec<(NetId, RipScope)> = chosen
            .into_iter()
            .filter(|(net, _)| self.nets.get(*net).topology.is_some())
            .map(|(net, scope)| match self.config.ripup_granularity {
                RipupGranularity::Net => (net, RipScope::Net),
                RipupGranularity::Segment => (net, scope),
            })
            .collect();
        selected.shuffle(&mut self.rng);
        log::debug!("Selected {} nets for reroute", selected.len());
        selected
    }

    fn rip_up_selected(&mut self, selected: &[(NetId, RipScope)]) -> usize {
        let mut ripped = 0;
        for (net, scope) in selected {
            let removed = match scope {
                RipScope::Net => self.global.rip_up_net(*net),
                RipScope::Edges(edges) => self.global.rip_up_segments_using(*net, edges),
            };
            let state = self.nets.get_mut(*net);
            if removed > 0 {
                ripped += 1;
                state.ripup_count += 1;
                self.dirty.insert(*net);
            }
            if matches!(state.status, NetStatus::Routed | NetStatus::Final) {
                state.status = NetStatus::RippedUp;
            }
        }
        ripped
    }

    fn retryable_unresolved(&self) -> Vec<NetId> {
        self.nets
            .ids_with(NetStatus::Unresolved)
            .into_iter()
            .filter(|n| !self.dead.contains(n))
            .collect()
    }

    /// Tree connections of `net` that have no committed segment yet.
    fn job_for(&self, net: NetId) -> Option<NetJob> {
        let topology = self.nets.get(net).topology.as_ref()?;
        let existing: BTreeSet<_> = self
            .global
            .net_segments(net)
            .iter()
            .filter_map(|&id| self.global.segment(id))
            .map(|s| (s.from, s.to))
            .collect();
        let connections = topology
            .connections()
            .into_iter()
            .filter(|pair| !existing.contains(pair))
            .map(|(from, to)| Connection {
                from,
                from_pos: topology.node(from).pos,
                to,
                to_pos: topology.node(to).pos,
            })
            .collect();
        Some(NetJob { net, connections })
    }

    /// Tile whose halo holds the whole net, preferring the one whose core
    /// holds the net's centre.
    fn tile_for(&self, net: NetId) -> Option<usize> {
        if self.tiles.len() <= 1 {
            return None;
        }
        let bbox = self.nets.get(net).bbox?;
        let (cx, cy) = bbox.center();
        self.tiles
            .iter()
            .position(|t| t.core.contains(cx, cy) && t.halo.contains_box(&bbox))
            .or_else(|| self.tiles.iter().position(|t| t.halo.contains_box(&bbox)))
    }

    /// Routes `ids`: boundary nets serially on the shared grid first, then
    /// tile-local nets batch by batch on tile snapshots in parallel.
    fn route_nets(&mut self, ids: &[NetId], avoid_overflow: bool) {
        let policy = SearchPolicy {
            margin: Some(self.config.search_margin),
            max_expansions: self.config.max_expansions,
            avoid_overflow,
            allow_residual_overflow: self.config.allow_residual_overflow,
            deadline: self.deadline,
        };

        let mut boundary = Vec::new();
        let mut local: Vec<Vec<NetJob>> = vec![Vec::new(); self.tiles.len()];
        for &id in ids {
            let Some(job) = self.job_for(id) else {
                continue;
            };
            match self.tile_for(id) {
                Some(t) => local[t].push(job),
                None => boundary.push(job),
            }
        }

        let results = self.global.route_jobs(&boundary, &self.cost, &policy);
        self.apply_results(results);

        let mut retry = Vec::new();
        let batches = self.batches.clone();
        for batch in &batches {
            let mut workers: Vec<(Worker, Vec<NetJob>)> = Vec::new();
            for t in batch {
                let jobs = std::mem::take(&mut local[t.index()]);
                if !jobs.is_empty() {
                    workers.push((self.global.snapshot(self.tiles[t.index()]), jobs));
                }
            }
            if workers.is_empty() {
                continue;
            }

            let cost = &self.cost;
            let outputs: Vec<Vec<JobResult>> = workers
                .par_iter_mut()
                .map(|(worker, jobs)| worker.route_jobs(jobs, cost, &policy))
                .collect();

            let mut merged = Vec::new();
            for ((_, jobs), results) in workers.into_iter().zip(outputs) {
                for (job, result) in jobs.into_iter().zip(results) {
                    match result {
                        // The halo may be too tight; try again on the full grid.
                        JobResult::Failed {
                            reason: FailReason::Unroutable,
                            ..
                        } => retry.push(job),
                        routed => {
                            self.global.absorb(&routed);
                            merged.push(routed);
                        }
                    }
                }
            }
            self.apply_results(merged);
        }

        if !retry.is_empty() {
            log::debug!("{} tile-local nets retried on the full grid", retry.len());
            let results = self.global.route_jobs(&retry, &self.cost, &policy);
            self.apply_results(results);
        }
    }

    fn apply_results(&mut self, results: Vec<JobResult>) {
        for result in results {
            let net = result.net();
            self.dirty.insert(net);
            let state = self.nets.get_mut(net);
            match result {
                JobResult::Routed { .. } => {
                    state.status = NetStatus::Routed;
                    state.problem = None;
                    self.dead.remove(&net);
                }
                JobResult::Failed { reason, .. } => {
                    state.status = NetStatus::Unresolved;
                    state.problem = Some(
                        match reason {
                            FailReason::Unroutable => "no path under the current capacities",
                            FailReason::Abandoned => "search abandoned at the expansion limit",
                            FailReason::Deadline => "time budget exhausted",
                        }
                        .to_string(),
                    );
                    if reason == FailReason::Unroutable {
                        self.dead.insert(net);
                    }
                }
            }
        }
    }

    /// Rips up and reroutes `nets` immediately, outside the iteration loop.
    /// Duplicates are dropped with a warning. Returns how many were routed.
    pub fn reroute(&mut self, nets: &[NetId]) -> usize {
        let mut seen = BTreeSet::new();
        let mut unique = Vec::with_capacity(nets.len());
        for &net in nets {
            if net.index() >= self.nets.len() {
                log::warn!("Reroute request for unknown {:?}", net);
            } else if !seen.insert(net) {
                log::warn!("{:?} listed twice in reroute set; ignoring duplicate", net);
            } else if self.nets.get(net).topology.is_some() {
                unique.push(net);
            }
        }

        for &net in &unique {
            self.rip_up_net(net);
        }
        self.route_nets(&unique, true);
        unique
            .iter()
            .filter(|&&n| self.nets.get(n).status == NetStatus::Routed)
            .count()
    }

    /// Withdraws every committed segment of `net`. Idempotent.
    pub fn rip_up_net(&mut self, net: NetId) -> usize {
        if net.index() >= self.nets.len() {
            return 0;
        }
        let removed = self.global.rip_up_net(net);
        let state = self.nets.get_mut(net);
        if matches!(state.status, NetStatus::Routed | NetStatus::Final) {
            state.status = NetStatus::RippedUp;
        }
        if removed > 0 {
            state.ripup_count += 1;
            self.dirty.insert(net);
        }
        removed
    }

    /// Nets whose committed route changed since the previous call.
    pub fn take_dirty_nets(&mut self) -> Vec<NetId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn route_map(&self) -> RouteMap {
        build_route_map(&self.nets, &self.global, &self.via_names)
    }

    pub fn summary(&self) -> CongestionSummary {
        CongestionSummary::from_grid(self.global.grid())
    }

    pub fn report_congestion(&self, sink: &mut dyn CongestionSink) {
        self.global.grid().report_congestion(sink);
    }

    pub fn report(&self) -> RouteReport {
        let mut report = RouteReport {
            nets_total: self.nets.len(),
            routed: 0,
            trivial: 0,
            feed_through: 0,
            malformed: Vec::new(),
            unroutable: Vec::new(),
            iterations: self.iteration,
            stop_reason: self.stop_reason.unwrap_or(StopReason::BudgetExhausted),
            accepted: self.accepted,
            summary: self.summary(),
            best_iteration: self.best.map_or(0, |(i, _)| i),
            history: self.history.clone(),
        };
        for net in self.nets.iter() {
            match net.status {
                NetStatus::Routed | NetStatus::Final => report.routed += 1,
                NetStatus::Trivial => report.trivial += 1,
                NetStatus::FeedThrough => report.feed_through += 1,
                NetStatus::Malformed => report
                    .malformed
                    .push((net.id, net.problem.clone().unwrap_or_default())),
                NetStatus::Pending | NetStatus::RippedUp | NetStatus::Unresolved => {
                    let why = net.problem.clone().unwrap_or_else(|| "not routed".to_string());
                    report.unroutable.push((net.id, why));
                }
            }
        }
        report
    }

    pub fn grid(&self) -> &GridGraph {
        self.global.grid()
    }

    pub fn worker(&self) -> &Worker {
        &self.global
    }

    pub fn nets(&self) -> &NetArena {
        &self.nets
    }

    pub fn net(&self, id: NetId) -> &NetState {
        self.nets.get(id)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }
}

/// Picks one access point per terminal, the valid one closest to the
/// centroid of all of the net's valid access points, and maps it onto a
/// grid node with its layer clamped into the routing range.
fn snap_terminals<N: NetlistProvider + ?Sized>(
    netlist: &N,
    net: NetId,
    converter: &GridConverter,
    (min_layer, max_layer): (u8, u8),
) -> Result<Vec<PinAccess>, String> {
    let terminals = netlist.terminals(net);
    let on_grid = |ap: &AccessPoint| converter.try_to_grid(ap.pos, ap.layer).is_some();

    let valid: Vec<&AccessPoint> = terminals
        .iter()
        .flat_map(|t| t.access_points.iter())
        .filter(|ap| on_grid(ap))
        .collect();
    let centroid = if valid.is_empty() {
        Point::new(0, 0)
    } else {
        let n = valid.len() as i64;
        Point::new(
            valid.iter().map(|ap| ap.pos.x).sum::<i64>() / n,
            valid.iter().map(|ap| ap.pos.y).sum::<i64>() / n,
        )
    };

    terminals
        .iter()
        .map(|t| {
            let ap = t
                .access_points
                .iter()
                .filter(|ap| on_grid(ap))
                .min_by_key(|ap| ap.pos.manhattan(&centroid))
                .ok_or_else(|| {
                    format!("terminal '{}' has no access point inside the die", t.name)
                })?;
            Ok(PinAccess {
                access: *ap,
                node: converter.to_grid(ap.pos, ap.layer.clamp(min_layer, max_layer)),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::EdgeDir;
    use eda_common::db::core::{Design, LayerDirection};
    use eda_common::db::tech::TechData;
    use eda_common::util::generator::{GeneratorParams, generate_random_design};

    fn tech() -> TechData {
        let mut tech = TechData::default();
        tech.add_layer("M1".into(), LayerDirection::Horizontal, 100, 50);
        tech.add_layer("M2".into(), LayerDirection::Vertical, 100, 50);
        tech.add_layer("M3".into(), LayerDirection::Horizontal, 100, 50);
        tech
    }

    fn design() -> Design {
        Design::new(
            "t",
            Rect::new(Point::new(0, 0), Point::new(1000, 1000)),
            tech(),
        )
    }

    fn ap(x: i64, y: i64, layer: u8) -> AccessPoint {
        AccessPoint {
            pos: Point::new(x, y),
            layer,
        }
    }

    fn config() -> RoutingConfig {
        RoutingConfig {
            gcell_size: 100,
            max_routing_layer: 2,
            ..RoutingConfig::default()
        }
    }

    #[test]
    fn classifies_nets_on_construction() {
        let mut d = design();
        let single = d.add_net("single".into());
        d.add_terminal(single, "a".into(), vec![ap(50, 50, 0)]);
        let feed = d.add_net("feed".into());
        d.add_terminal(feed, "a".into(), vec![ap(510, 510, 1)]);
        d.add_terminal(feed, "b".into(), vec![ap(560, 540, 1)]);
        let bad = d.add_net("bad".into());
        d.add_terminal(bad, "a".into(), vec![ap(50, 50, 1)]);
        d.add_terminal(bad, "b".into(), vec![ap(5000, 50, 1)]);
        let two = d.add_net("two".into());
        d.add_terminal(two, "a".into(), vec![ap(50, 50, 1)]);
        d.add_terminal(two, "b".into(), vec![ap(850, 650, 1)]);

        let c = CongestionController::new(&d, &d, &d.die_area, &config()).unwrap();
        assert_eq!(c.net(single).status, NetStatus::Trivial);
        assert_eq!(c.net(feed).status, NetStatus::FeedThrough);
        assert!(c.worker().marker(feed).is_some());
        assert_eq!(c.net(bad).status, NetStatus::Malformed);
        assert!(c.net(bad).problem.as_deref().unwrap().contains("'b'"));
        assert_eq!(c.net(two).status, NetStatus::Pending);
    }

    #[test]
    fn access_point_nearest_centroid_wins() {
        let mut d = design();
        let n = d.add_net("n".into());
        d.add_terminal(n, "a".into(), vec![ap(950, 50, 1), ap(150, 50, 1)]);
        d.add_terminal(n, "b".into(), vec![ap(50, 50, 1)]);
        d.add_terminal(n, "c".into(), vec![ap(50, 150, 1)]);
        let conv = GridConverter::new(&d.die_area, 100);
        let pins = snap_terminals(&d, n, &conv, (1, 2)).unwrap();
        assert_eq!(pins[0].node, GridCoord::new(1, 0, 1));
    }

    #[test]
    fn terminal_layers_are_clamped_into_range() {
        let mut d = design();
        let n = d.add_net("n".into());
        d.add_terminal(n, "a".into(), vec![ap(50, 50, 0)]);
        let conv = GridConverter::new(&d.die_area, 100);
        let pins = snap_terminals(&d, n, &conv, (1, 2)).unwrap();
        assert_eq!(pins[0].node.z, 1);
        assert_eq!(pins[0].access.layer, 0);
    }

    #[test]
    fn run_routes_small_design_without_overflow() {
        let mut d = design();
        for i in 0..6 {
            let n = d.add_net(format!("n{i}"));
            d.add_terminal(n, "a".into(), vec![ap(50, 50 + i * 150, 1)]);
            d.add_terminal(n, "b".into(), vec![ap(950, 50 + i * 150, 1)]);
        }
        let mut c = CongestionController::new(&d, &d, &d.die_area, &config()).unwrap();
        let report = c.run();
        assert!(report.converged());
        assert!(report.accepted);
        assert_eq!(report.routed, 6);
        assert_eq!(report.summary.total_overflow, 0);
        assert_eq!(c.phase(), Phase::Done);
        assert_eq!(c.take_dirty_nets().len(), 6);
        assert!(c.take_dirty_nets().is_empty());
    }

    #[test]
    fn reroute_ignores_duplicates() {
        let mut d = design();
        let n = d.add_net("n".into());
        d.add_terminal(n, "a".into(), vec![ap(50, 50, 1)]);
        d.add_terminal(n, "b".into(), vec![ap(450, 450, 1)]);
        let mut c = CongestionController::new(&d, &d, &d.die_area, &config()).unwrap();
        c.run();
        let demand = c.grid().total_demand();
        assert_eq!(c.reroute(&[n, n]), 1);
        assert_eq!(c.grid().total_demand(), demand);
        assert_eq!(c.worker().net_segments(n).len(), 1);
    }

    /// Two nets forced through a one-track row with no way around.
    fn single_track_row() -> Design {
        let mut tech = TechData::default();
        tech.add_layer("M1".into(), LayerDirection::Horizontal, 100, 50);
        let mut d = Design::new("row", Rect::new(Point::new(0, 0), Point::new(300, 100)), tech);
        for name in ["a", "b"] {
            let n = d.add_net(name.into());
            d.add_terminal(n, "l".into(), vec![ap(50, 50, 0)]);
            d.add_terminal(n, "r".into(), vec![ap(250, 50, 0)]);
        }
        d
    }

    #[test]
    fn history_decays_only_in_drc_mode() {
        let d = single_track_row();
        let edge = GridEdge::new(GridCoord::new(0, 0, 0), EdgeDir::East);
        let mut history = Vec::new();
        for mode in [RipupMode::Drc, RipupMode::All] {
            let cfg = RoutingConfig {
                gcell_size: 100,
                min_routing_layer: 0,
                max_routing_layer: 0,
                ripup_mode: mode,
                overflow_iteration_budget: 3,
                ..RoutingConfig::default()
            };
            let mut c = CongestionController::new(&d, &d, &d.die_area, &cfg).unwrap();
            let report = c.run();
            assert_eq!(report.iterations, 1);
            history.push(c.grid().history_cost(edge));
        }
        // Overflow 1 charges 2 in both modes; drc then decays by 0.8.
        assert!((history[0] - 1.6).abs() < 1e-5, "drc history {}", history[0]);
        assert!((history[1] - 2.0).abs() < 1e-5, "all history {}", history[1]);
    }

    fn selection_after_overflow(mode: RipupMode) -> (NetId, NetId, Vec<NetId>) {
        let mut d = design();
        let crossing = d.add_net("crossing".into());
        d.add_terminal(crossing, "a".into(), vec![ap(50, 50, 1)]);
        d.add_terminal(crossing, "b".into(), vec![ap(250, 50, 1)]);
        let bystander = d.add_net("bystander".into());
        d.add_terminal(bystander, "a".into(), vec![ap(50, 250, 1)]);
        d.add_terminal(bystander, "b".into(), vec![ap(250, 250, 1)]);
        let cfg = RoutingConfig {
            ripup_mode: mode,
            tile_size: 5,
            tile_halo: 1,
            ..config()
        };
        let mut c = CongestionController::new(&d, &d, &d.die_area, &cfg).unwrap();
        assert!(c.step());
        assert_eq!(c.phase(), Phase::Evaluate);

        let id = c.worker().net_segments(crossing)[0];
        let edge = c.worker().segment(id).unwrap().edges()[0];
        c.global.grid_mut().set_capacity(edge, 0);
        assert_eq!(c.global.nets_using_edge(edge).len(), 1);

        let selected = c.select().into_iter().map(|(n, _)| n).collect();
        (crossing, bystander, selected)
    }

    #[test]
    fn drc_mode_selects_only_nets_on_overflowed_edges() {
        let (crossing, _, selected) = selection_after_overflow(RipupMode::Drc);
        assert_eq!(selected, vec![crossing]);
    }

    #[test]
    fn all_mode_selects_every_net_in_a_congested_tile() {
        let (crossing, bystander, mut selected) = selection_after_overflow(RipupMode::All);
        selected.sort();
        assert_eq!(selected, vec![crossing, bystander]);
    }

    #[test]
    fn tiled_run_matches_demand_bookkeeping() {
        let params = GeneratorParams {
            grid_width: 24,
            grid_height: 24,
            num_nets: 60,
            ..GeneratorParams::default()
        };
        let d = generate_random_design(&params);
        let cfg = RoutingConfig {
            gcell_size: params.gcell_size,
            max_routing_layer: params.num_layers - 1,
            tile_size: 8,
            tile_halo: 2,
            overflow_iteration_budget: 5,
            ..RoutingConfig::default()
        };
        let mut c = CongestionController::new(&d, &d, &d.die_area, &cfg).unwrap();
        assert_eq!(c.tiles().len(), 9);
        c.run();

        let committed: u64 = c
            .nets()
            .iter()
            .flat_map(|n| c.worker().net_segments(n.id).to_vec())
            .filter_map(|id| c.worker().segment(id))
            .map(|s| s.edges().len() as u64)
            .sum();
        assert_eq!(c.grid().total_demand(), committed);
    }
}
