use crate::algo::cost::CostModel;
use crate::grid::{GridEdge, RoutingGrid};
use eda_common::geom::coord::GridCoord;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Copy, Clone, Eq, PartialEq)]
struct State {
    f_score: i64,
    g_score: i64,
    vias: u32,
    bends: u32,
    index: u32,
}

// Min-heap on (f, vias, bends, index).
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| other.vias.cmp(&self.vias))
            .then_with(|| other.bends.cmp(&self.bends))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A simple path from one of the sources to one of the targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridPath {
    pub nodes: Vec<GridCoord>,
    pub cost: i64,
    pub vias: u32,
}

impl GridPath {
    pub fn edges(&self) -> Vec<GridEdge> {
        self.nodes
            .windows(2)
            .filter_map(|w| GridEdge::between(w[0], w[1]))
            .collect()
    }

    pub fn source(&self) -> GridCoord {
        self.nodes[0]
    }

    pub fn target(&self) -> GridCoord {
        self.nodes[self.nodes.len() - 1]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(GridPath),
    /// No path exists under the current capacities.
    Unroutable,
    /// The expansion limit was hit before a path was found.
    Abandoned,
}

pub struct SearchRequest<'a> {
    pub sources: &'a [GridCoord],
    pub targets: &'a [GridCoord],
    /// Restrict the first attempt to the endpoints' bounding box grown by this
    /// many gcells; `None` searches the whole grid directly.
    pub margin: Option<u32>,
    pub max_expansions: usize,
}

#[derive(Clone, Copy)]
struct RoutingWindow {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    width: u32,
    height: u32,
    layers: u8,
}

impl RoutingWindow {
    fn full<G: RoutingGrid + ?Sized>(grid: &G) -> Self {
        let (x0, y0) = grid.origin();
        Self::from_bounds(x0, x0 + grid.width() - 1, y0, y0 + grid.height() - 1, grid.layers())
    }

    fn around<G: RoutingGrid + ?Sized>(req: &SearchRequest, margin: u32, grid: &G) -> Self {
        let full = Self::full(grid);
        let mut min_x = u32::MAX;
        let mut max_x = 0;
        let mut min_y = u32::MAX;
        let mut max_y = 0;
        for c in req.sources.iter().chain(req.targets) {
            min_x = min_x.min(c.x);
            max_x = max_x.max(c.x);
            min_y = min_y.min(c.y);
            max_y = max_y.max(c.y);
        }
        Self::from_bounds(
            min_x.saturating_sub(margin).max(full.min_x),
            max_x.saturating_add(margin).min(full.max_x),
            min_y.saturating_sub(margin).max(full.min_y),
            max_y.saturating_add(margin).min(full.max_y),
            full.layers,
        )
    }

    fn from_bounds(min_x: u32, max_x: u32, min_y: u32, max_y: u32, layers: u8) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
            layers,
        }
    }

    fn size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.layers as usize)
    }

    #[inline(always)]
    fn get_local_idx(&self, c: GridCoord) -> usize {
        let lx = c.x - self.min_x;
        let ly = c.y - self.min_y;
        let lz = c.z as u32;
        (lz * self.width * self.height + ly * self.width + lx) as usize
    }
    #[inline(always)]
    fn get_coord(&self, idx: u32) -> GridCoord {
        let plane_size = self.width * self.height;
        let z = (idx / plane_size) as u8;
        let rem = idx % plane_size;
        let y = rem / self.width + self.min_y;
        let x = rem % self.width + self.min_x;
        GridCoord::new(x, y, z)
    }
}

/// Lower bound on the remaining cost to the target set: distance to the
/// targets' bounding box, planar steps and layer changes priced separately.
#[derive(Clone, Copy)]
struct Heuristic {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    min_z: u8,
    max_z: u8,
    planar: i64,
    via: i64,
}

impl Heuristic {
    fn new(targets: &[GridCoord], cost: &CostModel) -> Self {
        let (planar, via) = cost.step_bounds();
        let mut h = Self {
            min_x: u32::MAX,
            max_x: 0,
            min_y: u32::MAX,
            max_y: 0,
            min_z: u8::MAX,
            max_z: 0,
            planar,
            via,
        };
        for t in targets {
            h.min_x = h.min_x.min(t.x);
            h.max_x = h.max_x.max(t.x);
            h.min_y = h.min_y.min(t.y);
            h.max_y = h.max_y.max(t.y);
            h.min_z = h.min_z.min(t.z);
            h.max_z = h.max_z.max(t.z);
        }
        h
    }

    #[inline(always)]
    fn estimate(&self, c: GridCoord) -> i64 {
        let gap = |v: u32, lo: u32, hi: u32| {
            if v < lo {
                lo - v
            } else if v > hi {
                v - hi
            } else {
                0
            }
        };
        let planar = gap(c.x, self.min_x, self.max_x) + gap(c.y, self.min_y, self.max_y);
        let layers = gap(c.z as u32, self.min_z as u32, self.max_z as u32);
        planar as i64 * self.planar + layers as i64 * self.via
    }
}

#[inline(always)]
fn move_axis(a: GridCoord, b: GridCoord) -> u8 {
    if a.x != b.x {
        0
    } else if a.y != b.y {
        1
    } else {
        2
    }
}

/// Reusable A* engine. Buffers are sized to the largest window seen and reset
/// by bumping a tag, so one searcher can serve many requests.
#[derive(Clone)]
pub struct MazeSearcher {
    parents: Vec<u32>,
    g_score: Vec<i64>,
    vias: Vec<u32>,
    bends: Vec<u32>,
    visited_tag: Vec<u32>,
    closed_tag: Vec<u32>,
    target_tag: Vec<u32>,
    current_tag: u32,
    capacity: usize,
    expansions: usize,
}

impl Default for MazeSearcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MazeSearcher {
    pub fn new() -> Self {
        let cap = 100_000;
        Self {
            parents: vec![u32::MAX; cap],
            g_score: vec![i64::MAX; cap],
            vias: vec![0; cap],
            bends: vec![0; cap],
            visited_tag: vec![0; cap],
            closed_tag: vec![0; cap],
            target_tag: vec![0; cap],
            current_tag: 1,
            capacity: cap,
            expansions: 0,
        }
    }

    fn ensure_capacity(&mut self, size: usize) {
        if size > self.capacity {
            self.capacity = size.max(self.capacity * 2);
            self.parents.resize(self.capacity, u32::MAX);
            self.g_score.resize(self.capacity, i64::MAX);
            self.vias.resize(self.capacity, 0);
            self.bends.resize(self.capacity, 0);
            self.visited_tag.resize(self.capacity, 0);
            self.closed_tag.resize(self.capacity, 0);
            self.target_tag.resize(self.capacity, 0);
        }
    }

    fn reset_window(&mut self) {
        self.current_tag = self.current_tag.wrapping_add(1);
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.closed_tag.fill(0);
            self.target_tag.fill(0);
            self.current_tag = 1;
        }
    }

    /// Nodes expanded by the most recent call to [`MazeSearcher::search`].
    pub fn last_expansions(&self) -> usize {
        self.expansions
    }

    pub fn search<G: RoutingGrid + ?Sized>(
        &mut self,
        grid: &G,
        cost: &CostModel,
        req: &SearchRequest,
    ) -> SearchOutcome {
        self.expansions = 0;
        if req.sources.is_empty() || req.targets.is_empty() {
            return SearchOutcome::Unroutable;
        }
        if !req.sources.iter().chain(req.targets).all(|&c| grid.contains(c)) {
            log::debug!("Search endpoint outside grid view; unroutable");
            return SearchOutcome::Unroutable;
        }

        let full = RoutingWindow::full(grid);
        if let Some(margin) = req.margin {
            let window = RoutingWindow::around(req, margin, grid);
            if window.size() < full.size() {
                match self.search_in(grid, cost, req, &window) {
                    SearchOutcome::Unroutable => {
                        log::debug!("Windowed search failed; retrying on the full grid");
                    }
                    other => return other,
                }
            }
        }
        self.search_in(grid, cost, req, &full)
    }

    fn search_in<G: RoutingGrid + ?Sized>(
        &mut self,
        grid: &G,
        cost: &CostModel,
        req: &SearchRequest,
        window: &RoutingWindow,
    ) -> SearchOutcome {
        self.ensure_capacity(window.size());
        self.reset_window();
        let tag = self.current_tag;
        let heuristic = Heuristic::new(req.targets, cost);

        for &t in req.targets {
            self.target_tag[window.get_local_idx(t)] = tag;
        }

        let mut heap = BinaryHeap::new();
        for &start in req.sources {
            let local = window.get_local_idx(start);
            if self.visited_tag[local] == tag {
                continue;
            }
            self.g_score[local] = 0;
            self.vias[local] = 0;
            self.bends[local] = 0;
            self.visited_tag[local] = tag;
            self.parents[local] = u32::MAX;
            heap.push(State {
                f_score: heuristic.estimate(start),
                g_score: 0,
                vias: 0,
                bends: 0,
                index: local as u32,
            });
        }

        while let Some(state) = heap.pop() {
            let curr_local = state.index as usize;
            if self.closed_tag[curr_local] == tag
                || state.g_score != self.g_score[curr_local]
                || state.vias != self.vias[curr_local]
                || state.bends != self.bends[curr_local]
            {
                continue;
            }
            self.closed_tag[curr_local] = tag;

            if self.target_tag[curr_local] == tag {
                return SearchOutcome::Found(self.reconstruct_path(curr_local, window, state));
            }

            self.expansions += 1;
            if self.expansions > req.max_expansions {
                return SearchOutcome::Abandoned;
            }

            let position = window.get_coord(state.index);
            let parent = self.parents[curr_local];
            let incoming = if parent == u32::MAX {
                None
            } else {
                Some(move_axis(window.get_coord(parent), position))
            };

            let mut neighbors = [position; 6];
            let mut n_count = 0;
            if position.x > window.min_x {
                neighbors[n_count] = GridCoord::new(position.x - 1, position.y, position.z);
                n_count += 1;
            }
            if position.x < window.max_x {
                neighbors[n_count] = GridCoord::new(position.x + 1, position.y, position.z);
                n_count += 1;
            }
            if position.y > window.min_y {
                neighbors[n_count] = GridCoord::new(position.x, position.y - 1, position.z);
                n_count += 1;
            }
            if position.y < window.max_y {
                neighbors[n_count] = GridCoord::new(position.x, position.y + 1, position.z);
                n_count += 1;
            }
            if position.z > 0 {
                neighbors[n_count] = GridCoord::new(position.x, position.y, position.z - 1);
                n_count += 1;
            }
            if position.z + 1 < window.layers {
                neighbors[n_count] = GridCoord::new(position.x, position.y, position.z + 1);
                n_count += 1;
            }

            for &neighbor in &neighbors[..n_count] {
                let neighbor_local = window.get_local_idx(neighbor);
                if self.closed_tag[neighbor_local] == tag {
                    continue;
                }
                let Some(edge) = GridEdge::between(position, neighbor) else {
                    continue;
                };
                let Some(step) = cost.edge_cost(grid, edge) else {
                    continue;
                };

                let axis = move_axis(position, neighbor);
                let label = (
                    state.g_score + step,
                    state.vias + u32::from(axis == 2),
                    state.bends + u32::from(incoming.is_some_and(|a| a != axis)),
                );

                if self.visited_tag[neighbor_local] != tag
                    || label
                        < (
                            self.g_score[neighbor_local],
                            self.vias[neighbor_local],
                            self.bends[neighbor_local],
                        )
                {
                    self.parents[neighbor_local] = curr_local as u32;
                    self.g_score[neighbor_local] = label.0;
                    self.vias[neighbor_local] = label.1;
                    self.bends[neighbor_local] = label.2;
                    self.visited_tag[neighbor_local] = tag;
                    heap.push(State {
                        f_score: label.0 + heuristic.estimate(neighbor),
                        g_score: label.0,
                        vias: label.1,
                        bends: label.2,
                        index: neighbor_local as u32,
                    });
                }
            }
        }
        SearchOutcome::Unroutable
    }

    fn reconstruct_path(&self, end_local: usize, window: &RoutingWindow, state: State) -> GridPath {
        let mut nodes = Vec::new();
        let mut curr_local = end_local;
        loop {
            nodes.push(window.get_coord(curr_local as u32));
            let parent = self.parents[curr_local];
            if parent == u32::MAX {
                break;
            }
            curr_local = parent as usize;
        }
        nodes.reverse();
        GridPath {
            nodes,
            cost: state.g_score,
            vias: state.vias,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{EdgeDir, GridGraph};
    use eda_common::db::core::LayerDirection;
    use eda_common::util::config::RoutingConfig;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn open_grid(w: u32, h: u32, layers: u8, cap: u32) -> GridGraph {
        let mut g = GridGraph::new(w, h, layers, vec![LayerDirection::Unknown; layers as usize]);
        let all: Vec<GridEdge> = g.edges().collect();
        for e in all {
            g.set_capacity(e, cap);
        }
        g
    }

    fn cost() -> CostModel {
        CostModel::from_config(&RoutingConfig::default())
    }

    fn request<'a>(sources: &'a [GridCoord], targets: &'a [GridCoord]) -> SearchRequest<'a> {
        SearchRequest {
            sources,
            targets,
            margin: None,
            max_expansions: 1_000_000,
        }
    }

    fn brute_force_best(
        grid: &GridGraph,
        cost: &CostModel,
        from: GridCoord,
        to: GridCoord,
    ) -> Option<(i64, u32)> {
        fn dfs(
            grid: &GridGraph,
            cost: &CostModel,
            path: &mut Vec<GridCoord>,
            seen: &mut HashSet<GridCoord>,
            to: GridCoord,
            best: &mut Option<(i64, u32)>,
        ) {
            let here = *path.last().unwrap();
            if here == to {
                let c = cost.path_cost(grid, path).unwrap();
                let vias = path.windows(2).filter(|w| w[0].z != w[1].z).count() as u32;
                if best.is_none_or(|b| (c, vias) < b) {
                    *best = Some((c, vias));
                }
                return;
            }
            let steps = [
                (-1i64, 0i64, 0i64),
                (1, 0, 0),
                (0, -1, 0),
                (0, 1, 0),
                (0, 0, -1),
                (0, 0, 1),
            ];
            for (dx, dy, dz) in steps {
                let (nx, ny, nz) = (here.x as i64 + dx, here.y as i64 + dy, here.z as i64 + dz);
                if nx < 0 || ny < 0 || nz < 0 {
                    continue;
                }
                let next = GridCoord::new(nx as u32, ny as u32, nz as u8);
                if !grid.contains(next) || seen.contains(&next) {
                    continue;
                }
                let Some(e) = GridEdge::between(here, next) else {
                    continue;
                };
                if cost.edge_cost(grid, e).is_none() {
                    continue;
                }
                seen.insert(next);
                path.push(next);
                dfs(grid, cost, path, seen, to, best);
                path.pop();
                seen.remove(&next);
            }
        }
        let mut best = None;
        let mut seen = HashSet::from([from]);
        dfs(grid, cost, &mut vec![from], &mut seen, to, &mut best);
        best
    }

    #[test]
    fn straight_line_on_empty_grid() {
        let g = open_grid(6, 3, 1, 4);
        let mut s = MazeSearcher::new();
        let src = [GridCoord::new(0, 1, 0)];
        let dst = [GridCoord::new(5, 1, 0)];
        let SearchOutcome::Found(path) = s.search(&g, &cost(), &request(&src, &dst)) else {
            panic!("expected a path");
        };
        assert_eq!(path.nodes.len(), 6);
        assert_eq!(path.cost, 500);
        assert_eq!(path.vias, 0);
        assert_eq!(path.edges().len(), 5);
    }

    #[test]
    fn matches_brute_force_on_small_grids() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = cost();
        let mut searcher = MazeSearcher::new();
        for _ in 0..12 {
            let mut g = open_grid(3, 3, 2, 3);
            let edges: Vec<GridEdge> = g.edges().collect();
            for &e in &edges {
                for _ in 0..rng.gen_range(0..4) {
                    g.add_demand(e);
                }
                if rng.gen_bool(0.1) {
                    g.set_capacity(e, 0);
                }
                if rng.gen_bool(0.3) {
                    g.add_history_cost(e, rng.gen_range(0.0..3.0));
                }
            }
            let from = GridCoord::new(
                rng.gen_range(0..3),
                rng.gen_range(0..3),
                rng.gen_range(0..2),
            );
            let to = GridCoord::new(rng.gen_range(0..3), rng.gen_range(0..3), rng.gen_range(0..2));
            let expected = brute_force_best(&g, &model, from, to);
            let outcome = searcher.search(&g, &model, &request(&[from], &[to]));
            match (expected, outcome) {
                (None, SearchOutcome::Unroutable) => {}
                (Some((c, v)), SearchOutcome::Found(path)) => {
                    assert_eq!(path.cost, c);
                    assert_eq!(path.vias, v);
                    assert_eq!(model.path_cost(&g, &path.nodes), Some(c));
                    let unique: HashSet<_> = path.nodes.iter().collect();
                    assert_eq!(unique.len(), path.nodes.len());
                }
                (e, o) => panic!("brute force {:?} vs search {:?}", e, o),
            }
        }
    }

    #[test]
    fn blocked_cut_is_unroutable() {
        let mut g = open_grid(3, 3, 1, 2);
        for y in 0..3 {
            g.set_capacity(GridEdge::new(GridCoord::new(1, y, 0), EdgeDir::East), 0);
        }
        let mut s = MazeSearcher::new();
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(2, 2, 0)];
        assert_eq!(s.search(&g, &cost(), &request(&src, &dst)), SearchOutcome::Unroutable);
    }

    #[test]
    fn window_falls_back_to_full_grid() {
        let mut g = open_grid(10, 10, 1, 2);
        // Wall between x=4 and x=5 except at y=9.
        for y in 0..9 {
            g.set_capacity(GridEdge::new(GridCoord::new(4, y, 0), EdgeDir::East), 0);
        }
        let mut s = MazeSearcher::new();
        let src = [GridCoord::new(3, 0, 0)];
        let dst = [GridCoord::new(6, 0, 0)];
        let req = SearchRequest {
            margin: Some(1),
            ..request(&src, &dst)
        };
        let SearchOutcome::Found(path) = s.search(&g, &cost(), &req) else {
            panic!("fallback should find the detour");
        };
        assert!(path.nodes.iter().any(|c| c.y == 9));
    }

    #[test]
    fn expansion_limit_abandons() {
        let g = open_grid(30, 30, 1, 2);
        let mut s = MazeSearcher::new();
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(29, 29, 0)];
        let req = SearchRequest {
            max_expansions: 5,
            ..request(&src, &dst)
        };
        assert_eq!(s.search(&g, &cost(), &req), SearchOutcome::Abandoned);
    }

    #[test]
    fn set_to_set_picks_closest_pair() {
        let g = open_grid(8, 8, 1, 2);
        let mut s = MazeSearcher::new();
        let sources = [GridCoord::new(0, 0, 0), GridCoord::new(4, 4, 0)];
        let targets = [GridCoord::new(7, 7, 0), GridCoord::new(4, 6, 0)];
        let SearchOutcome::Found(path) = s.search(&g, &cost(), &request(&sources, &targets)) else {
            panic!("expected a path");
        };
        assert_eq!(path.source(), GridCoord::new(4, 4, 0));
        assert_eq!(path.target(), GridCoord::new(4, 6, 0));
        assert_eq!(path.cost, 200);
    }

    #[test]
    fn prefers_fewer_vias_on_cost_tie() {
        let cfg = RoutingConfig {
            via_cost: 0.0,
            ..RoutingConfig::default()
        };
        let model = CostModel::from_config(&cfg);
        let g = open_grid(3, 1, 2, 4);
        let mut s = MazeSearcher::new();
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(2, 0, 0)];
        let SearchOutcome::Found(path) = s.search(&g, &model, &request(&src, &dst)) else {
            panic!("expected a path");
        };
        assert_eq!(path.vias, 0);
        assert!(path.nodes.iter().all(|c| c.z == 0));
    }

    #[test]
    fn source_inside_target_set_is_zero_length() {
        let g = open_grid(3, 3, 1, 2);
        let mut s = MazeSearcher::new();
        let c = [GridCoord::new(1, 1, 0)];
        let SearchOutcome::Found(path) = s.search(&g, &cost(), &request(&c, &c)) else {
            panic!("expected a path");
        };
        assert_eq!(path.nodes, vec![c[0]]);
        assert_eq!(path.cost, 0);
        assert!(path.edges().is_empty());
    }
}
