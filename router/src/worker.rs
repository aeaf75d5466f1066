//! Routing workers. The global worker owns the shared grid; tile workers are
//! snapshots of one tile's halo that route their local nets in parallel and
//! hand the committed paths back for merging.

use crate::algo::cost::CostModel;
use crate::algo::maze::{MazeSearcher, SearchOutcome, SearchRequest};
use crate::grid::{GridBox, GridEdge, GridGraph, RoutingGrid};
use crate::net::{Segment, SegmentArena};
use crate::region_query::{RegionQueryIndex, Shape, ShapeOwner, shapes_for_path};
use crate::utils::conversion::GridConverter;
use eda_common::db::indices::{NetId, SegmentId, TileId, TopoNodeId};
use eda_common::geom::coord::GridCoord;
use eda_common::geom::rect::Rect;
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub id: TileId,
    pub core: GridBox,
    /// Core grown by the halo margin, clipped to the grid.
    pub halo: GridBox,
}

/// Cuts a `width x height` grid into square tiles of `tile_size` gcells.
pub fn partition(width: u32, height: u32, tile_size: u32, halo: u32) -> Vec<Tile> {
    let tile_size = tile_size.max(1);
    let mut tiles = Vec::new();
    for y in (0..height).step_by(tile_size as usize) {
        for x in (0..width).step_by(tile_size as usize) {
            let core = GridBox::new(
                x,
                y,
                (x + tile_size - 1).min(width - 1),
                (y + tile_size - 1).min(height - 1),
            );
            tiles.push(Tile {
                id: TileId::new(tiles.len()),
                core,
                halo: core.expanded(halo, width, height),
            });
        }
    }
    tiles
}

/// Groups tiles into batches whose halos are pairwise disjoint, so the tiles
/// of one batch never share a grid edge.
pub fn schedule_batches(tiles: &[Tile]) -> Vec<Vec<TileId>> {
    let mut remaining: Vec<&Tile> = tiles.iter().collect();
    let mut batches = Vec::new();
    while !remaining.is_empty() {
        let mut batch: Vec<&Tile> = Vec::new();
        let mut deferred = Vec::new();
        for tile in remaining {
            if batch.iter().all(|t| !t.halo.intersects(&tile.halo)) {
                batch.push(tile);
            } else {
                deferred.push(tile);
            }
        }
        batches.push(batch.iter().map(|t| t.id).collect());
        remaining = deferred;
    }
    batches
}

/// One tree edge of a net still to be wired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    pub from: TopoNodeId,
    pub from_pos: GridCoord,
    pub to: TopoNodeId,
    pub to_pos: GridCoord,
}

#[derive(Clone, Debug)]
pub struct NetJob {
    pub net: NetId,
    pub connections: Vec<Connection>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedSegment {
    pub from: TopoNodeId,
    pub to: TopoNodeId,
    pub path: Vec<GridCoord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailReason {
    Unroutable,
    Abandoned,
    Deadline,
}

#[derive(Clone, Debug)]
pub enum JobResult {
    Routed {
        net: NetId,
        segments: Vec<RoutedSegment>,
    },
    Failed {
        net: NetId,
        reason: FailReason,
    },
}

impl JobResult {
    pub fn net(&self) -> NetId {
        match self {
            JobResult::Routed { net, .. } | JobResult::Failed { net, .. } => *net,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SearchPolicy {
    pub margin: Option<u32>,
    pub max_expansions: usize,
    /// Retry with hard capacities when the cheapest path overflows.
    pub avoid_overflow: bool,
    /// Commit the overflowing path when the hard retry finds nothing.
    /// Otherwise the connection fails as unroutable.
    pub allow_residual_overflow: bool,
    pub deadline: Option<Instant>,
}

impl SearchPolicy {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

pub struct Worker {
    tile: Option<Tile>,
    grid: GridGraph,
    index: RegionQueryIndex,
    segments: SegmentArena,
    net_segments: BTreeMap<NetId, Vec<SegmentId>>,
    markers: BTreeMap<NetId, Shape>,
    searcher: MazeSearcher,
    converter: GridConverter,
    half_width: i64,
}

impl Worker {
    pub fn new(grid: GridGraph, converter: GridConverter) -> Self {
        let index = RegionQueryIndex::new(grid.layers());
        Self {
            tile: None,
            grid,
            index,
            segments: SegmentArena::default(),
            net_segments: BTreeMap::new(),
            markers: BTreeMap::new(),
            searcher: MazeSearcher::new(),
            converter,
            half_width: (converter.pitch() / 8).max(1),
        }
    }

    /// Private copy of `tile`'s halo: grid state and the shapes inside it.
    /// Segments committed on the snapshot get handles that do not clash with
    /// this worker's.
    pub fn snapshot(&self, tile: Tile) -> Worker {
        let h = tile.halo;
        let world = self
            .converter
            .cell_rect(h.x_lo, h.y_lo)
            .union(&self.converter.cell_rect(h.x_hi, h.y_hi));
        Worker {
            tile: Some(tile),
            grid: self.grid.extract(h.x_lo, h.y_lo, h.x_hi, h.y_hi),
            index: self.index.extract(world),
            segments: SegmentArena::continuing(&self.segments),
            net_segments: BTreeMap::new(),
            markers: BTreeMap::new(),
            searcher: MazeSearcher::new(),
            converter: self.converter,
            half_width: self.half_width,
        }
    }

    pub fn tile(&self) -> Option<&Tile> {
        self.tile.as_ref()
    }

    pub fn grid(&self) -> &GridGraph {
        &self.grid
    }

    /// Mutable grid access for history updates between iterations.
    pub fn grid_mut(&mut self) -> &mut GridGraph {
        &mut self.grid
    }

    pub fn index(&self) -> &RegionQueryIndex {
        &self.index
    }

    pub fn converter(&self) -> &GridConverter {
        &self.converter
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn net_segments(&self, net: NetId) -> &[SegmentId] {
        self.net_segments.get(&net).map_or(&[], |v| v.as_slice())
    }

    pub fn marker(&self, net: NetId) -> Option<&Shape> {
        self.markers.get(&net)
    }

    /// Installs `path` as a segment of `net`: one unit of demand per edge and
    /// its shapes in the index.
    pub fn commit_segment(
        &mut self,
        net: NetId,
        from: TopoNodeId,
        to: TopoNodeId,
        path: Vec<GridCoord>,
    ) -> SegmentId {
        let segment = Segment::new(net, from, to, path);
        for &edge in segment.edges() {
            self.grid.add_demand(edge);
        }
        let shapes = shapes_for_path(&segment.path, &self.converter, self.half_width);
        let id = self.segments.insert(segment);
        let owner = ShapeOwner {
            net,
            segment: Some(id),
        };
        for shape in shapes {
            self.index.insert(shape, owner);
        }
        self.net_segments.entry(net).or_default().push(id);
        id
    }

    /// Exact inverse of [`Worker::commit_segment`].
    pub fn rip_up_segment(&mut self, id: SegmentId) -> Option<Segment> {
        let segment = self.segments.remove(id)?;
        for &edge in segment.edges() {
            self.grid.subtract_demand(edge);
        }
        let owner = ShapeOwner {
            net: segment.net,
            segment: Some(id),
        };
        for shape in shapes_for_path(&segment.path, &self.converter, self.half_width) {
            if !self.index.remove(shape, owner) {
                log::warn!("Shape {:?} of {:?} missing from the region index", shape, segment.net);
            }
        }
        if let Some(ids) = self.net_segments.get_mut(&segment.net) {
            ids.retain(|&s| s != id);
            if ids.is_empty() {
                self.net_segments.remove(&segment.net);
            }
        }
        Some(segment)
    }

    /// Removes every segment of `net`. Returns how many were removed; a
    /// second call is a no-op.
    pub fn rip_up_net(&mut self, net: NetId) -> usize {
        let ids = self.net_segments(net).to_vec();
        ids.into_iter()
            .filter(|&id| self.rip_up_segment(id).is_some())
            .count()
    }

    /// Removes only the segments of `net` that use one of `edges`.
    pub fn rip_up_segments_using(&mut self, net: NetId, edges: &[GridEdge]) -> usize {
        let doomed: Vec<SegmentId> = self
            .net_segments(net)
            .iter()
            .copied()
            .filter(|&id| {
                self.segments
                    .get(id)
                    .is_some_and(|s| edges.iter().any(|&e| s.uses_edge(e)))
            })
            .collect();
        doomed
            .into_iter()
            .filter(|&id| self.rip_up_segment(id).is_some())
            .count()
    }

    /// Places the marker of a feed-through net: a patch covering its gcell.
    pub fn place_marker(&mut self, net: NetId, pos: GridCoord) {
        let shape = Shape::Patch {
            layer: pos.z,
            rect: self.converter.cell_rect(pos.x, pos.y),
        };
        let owner = ShapeOwner { net, segment: None };
        if let Some(old) = self.markers.insert(net, shape) {
            self.index.remove(old, owner);
        }
        self.index.insert(shape, owner);
    }

    /// Nets owning a committed segment that traverses `edge`, found through
    /// the region index and confirmed against the segment's edge list.
    pub fn nets_using_edge(&self, edge: GridEdge) -> Vec<(NetId, SegmentId)> {
        let a = self.converter.to_world(edge.from);
        let b = self.converter.to_world(edge.to());
        let probe = Rect::from_corners(a, b);
        let mut hits: Vec<(NetId, SegmentId)> = self
            .index
            .query(probe, edge.from.z)
            .into_iter()
            .filter_map(|o| o.segment.map(|s| (o.net, s)))
            .filter(|&(_, s)| self.segments.get(s).is_some_and(|seg| seg.uses_edge(edge)))
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    /// Nets with a routed shape inside the given gcell box, on any layer.
    pub fn nets_in_box(&self, area: &GridBox) -> Vec<NetId> {
        let world = self
            .converter
            .cell_rect(area.x_lo, area.y_lo)
            .union(&self.converter.cell_rect(area.x_hi, area.y_hi));
        let mut nets: Vec<NetId> = (0..self.index.num_layers())
            .flat_map(|layer| self.index.query(world, layer))
            .filter(|o| o.segment.is_some())
            .map(|o| o.net)
            .collect();
        nets.sort_unstable();
        nets.dedup();
        nets
    }

    /// Routes every connection of `job` and commits the paths here. On any
    /// failure the paths committed for this job are withdrawn.
    pub fn route_job(
        &mut self,
        job: &NetJob,
        cost: &CostModel,
        policy: &SearchPolicy,
    ) -> JobResult {
        let hard = cost.hard();
        let mut committed = Vec::with_capacity(job.connections.len());
        for conn in &job.connections {
            let outcome = if policy.expired() {
                Err(FailReason::Deadline)
            } else {
                self.connect(conn, cost, &hard, policy)
            };
            match outcome {
                Ok(path) => committed.push(self.commit_segment(job.net, conn.from, conn.to, path)),
                Err(reason) => {
                    log::debug!("{:?}: connection {:?} failed ({:?})", job.net, conn, reason);
                    for id in committed {
                        self.rip_up_segment(id);
                    }
                    return JobResult::Failed {
                        net: job.net,
                        reason,
                    };
                }
            }
        }

        let segments = committed
            .iter()
            .filter_map(|&id| self.segments.get(id))
            .map(|s| RoutedSegment {
                from: s.from,
                to: s.to,
                path: s.path.clone(),
            })
            .collect();
        JobResult::Routed {
            net: job.net,
            segments,
        }
    }

    pub fn route_jobs(
        &mut self,
        jobs: &[NetJob],
        cost: &CostModel,
        policy: &SearchPolicy,
    ) -> Vec<JobResult> {
        jobs.iter()
            .map(|job| self.route_job(job, cost, policy))
            .collect()
    }

    /// Commits the paths a tile worker reported for a routed job.
    pub fn absorb(&mut self, result: &JobResult) -> usize {
        match result {
            JobResult::Routed { net, segments } => {
                for s in segments {
                    self.commit_segment(*net, s.from, s.to, s.path.clone());
                }
                segments.len()
            }
            JobResult::Failed { .. } => 0,
        }
    }

    fn connect(
        &mut self,
        conn: &Connection,
        cost: &CostModel,
        hard: &CostModel,
        policy: &SearchPolicy,
    ) -> Result<Vec<GridCoord>, FailReason> {
        let sources = [conn.from_pos];
        let targets = [conn.to_pos];
        let request = SearchRequest {
            sources: &sources,
            targets: &targets,
            margin: policy.margin,
            max_expansions: policy.max_expansions,
        };
        let path = match self.searcher.search(&self.grid, cost, &request) {
            SearchOutcome::Found(path) => path,
            SearchOutcome::Unroutable => return Err(FailReason::Unroutable),
            SearchOutcome::Abandoned => return Err(FailReason::Abandoned),
        };
        if !policy.avoid_overflow || !cost.path_overflows(&self.grid, &path.nodes) {
            return Ok(path.nodes);
        }
        match self.searcher.search(&self.grid, hard, &request) {
            SearchOutcome::Found(strict) => Ok(strict.nodes),
            _ if policy.allow_residual_overflow => Ok(path.nodes),
            SearchOutcome::Abandoned => Err(FailReason::Abandoned),
            SearchOutcome::Unroutable => Err(FailReason::Unroutable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::core::LayerDirection;
    use eda_common::geom::point::Point;
    use eda_common::util::config::RoutingConfig;

    fn worker(w: u32, h: u32, cap: u32) -> Worker {
        let mut grid = GridGraph::new(
            w,
            h,
            2,
            vec![LayerDirection::Horizontal, LayerDirection::Vertical],
        );
        let edges: Vec<GridEdge> = grid.edges().collect();
        for e in edges {
            grid.set_capacity(e, cap);
        }
        let die = Rect::new(Point::new(0, 0), Point::new(w as i64 * 100, h as i64 * 100));
        Worker::new(grid, GridConverter::new(&die, 100))
    }

    fn policy() -> SearchPolicy {
        SearchPolicy {
            margin: Some(4),
            max_expansions: 100_000,
            avoid_overflow: true,
            allow_residual_overflow: false,
            deadline: None,
        }
    }

    fn job(net: usize, a: GridCoord, b: GridCoord) -> NetJob {
        NetJob {
            net: NetId::new(net),
            connections: vec![Connection {
                from: TopoNodeId::new(0),
                from_pos: a,
                to: TopoNodeId::new(1),
                to_pos: b,
            }],
        }
    }

    #[test]
    fn partition_covers_grid_once() {
        let tiles = partition(10, 7, 4, 1);
        assert_eq!(tiles.len(), 6);
        for y in 0..7 {
            for x in 0..10 {
                let owners = tiles.iter().filter(|t| t.core.contains(x, y)).count();
                assert_eq!(owners, 1, "cell ({x},{y})");
            }
        }
        assert_eq!(tiles[0].halo, GridBox::new(0, 0, 4, 4));
    }

    #[test]
    fn batches_have_disjoint_halos() {
        let tiles = partition(40, 40, 8, 2);
        let batches = schedule_batches(&tiles);
        assert_eq!(batches.iter().map(|b| b.len()).sum::<usize>(), tiles.len());
        for batch in &batches {
            for (i, a) in batch.iter().enumerate() {
                for b in &batch[i + 1..] {
                    assert!(!tiles[a.index()].halo.intersects(&tiles[b.index()].halo));
                }
            }
        }
        assert!(batches.len() > 1);
    }

    #[test]
    fn commit_then_rip_up_restores_demand() {
        let mut w = worker(6, 6, 4);
        let cost = CostModel::from_config(&RoutingConfig::default());
        let result = w.route_job(
            &job(0, GridCoord::new(0, 0, 0), GridCoord::new(5, 4, 0)),
            &cost,
            &policy(),
        );
        assert!(matches!(result, JobResult::Routed { .. }));
        assert!(w.grid().total_demand() > 0);
        assert!(!w.index().is_empty());

        assert_eq!(w.rip_up_net(NetId::new(0)), 1);
        assert_eq!(w.rip_up_net(NetId::new(0)), 0);
        assert_eq!(w.grid().total_demand(), 0);
        assert!(w.index().is_empty());
        assert_eq!(w.segment_count(), 0);
    }

    #[test]
    fn edge_lookup_confirms_segment_edges() {
        let mut w = worker(5, 5, 4);
        let path = vec![
            GridCoord::new(0, 2, 0),
            GridCoord::new(1, 2, 0),
            GridCoord::new(2, 2, 0),
        ];
        let id = w.commit_segment(NetId::new(3), TopoNodeId::new(0), TopoNodeId::new(1), path);
        let used = GridEdge::between(GridCoord::new(1, 2, 0), GridCoord::new(2, 2, 0)).unwrap();
        assert_eq!(w.nets_using_edge(used), vec![(NetId::new(3), id)]);

        // Touches the wire's box but is not part of the path.
        let beside = GridEdge::between(GridCoord::new(2, 2, 0), GridCoord::new(2, 3, 0)).unwrap();
        assert!(w.nets_using_edge(beside).is_empty());
    }

    #[test]
    fn snapshot_merge_matches_direct_commit() {
        let mut global = worker(12, 12, 4);
        let tiles = partition(12, 12, 6, 2);
        let cost = CostModel::from_config(&RoutingConfig::default());
        let jobs = vec![job(1, GridCoord::new(0, 0, 0), GridCoord::new(3, 3, 0))];

        let mut local = global.snapshot(tiles[0]);
        let results = local.route_jobs(&jobs, &cost, &policy());
        let local_demand = local.grid().total_demand();
        for r in &results {
            global.absorb(r);
        }
        assert_eq!(global.grid().total_demand(), local_demand);
        assert_eq!(global.net_segments(NetId::new(1)).len(), 1);
    }

    #[test]
    fn failed_job_leaves_no_demand() {
        let mut w = worker(4, 4, 0);
        let cost = CostModel::from_config(&RoutingConfig::default());
        let result = w.route_job(
            &job(0, GridCoord::new(0, 0, 0), GridCoord::new(3, 0, 0)),
            &cost,
            &policy(),
        );
        assert!(matches!(
            result,
            JobResult::Failed {
                reason: FailReason::Unroutable,
                ..
            }
        ));
        assert_eq!(w.grid().total_demand(), 0);
        assert!(w.net_segments(NetId::new(0)).is_empty());
    }

    #[test]
    fn exhausted_edge_fails_unless_overflow_allowed() {
        let mut grid = GridGraph::new(3, 1, 1, vec![LayerDirection::Horizontal]);
        let edges: Vec<GridEdge> = grid.edges().collect();
        for e in edges {
            grid.set_capacity(e, 1);
        }
        let die = Rect::new(Point::new(0, 0), Point::new(300, 100));
        let mut w = Worker::new(grid, GridConverter::new(&die, 100));
        let cost = CostModel::from_config(&RoutingConfig::default());
        let (a, b) = (GridCoord::new(0, 0, 0), GridCoord::new(2, 0, 0));

        let first = w.route_job(&job(0, a, b), &cost, &policy());
        assert!(matches!(first, JobResult::Routed { .. }));
        let second = w.route_job(&job(1, a, b), &cost, &policy());
        assert!(matches!(
            second,
            JobResult::Failed {
                reason: FailReason::Unroutable,
                ..
            }
        ));
        assert_eq!(w.grid().total_demand(), 2);
        assert_eq!(w.grid().total_overflow(), 0);

        let mut lenient = policy();
        lenient.allow_residual_overflow = true;
        let second = w.route_job(&job(1, a, b), &cost, &lenient);
        assert!(matches!(second, JobResult::Routed { .. }));
        assert_eq!(w.grid().total_overflow(), 2);
    }

    #[test]
    fn expired_deadline_fails_job() {
        let mut w = worker(4, 4, 2);
        let cost = CostModel::from_config(&RoutingConfig::default());
        let mut p = policy();
        p.deadline = Some(Instant::now());
        let result = w.route_job(
            &job(0, GridCoord::new(0, 0, 0), GridCoord::new(3, 0, 0)),
            &cost,
            &p,
        );
        assert!(matches!(
            result,
            JobResult::Failed {
                reason: FailReason::Deadline,
                ..
            }
        ));
    }
}
