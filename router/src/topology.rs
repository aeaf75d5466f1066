//! Per-net connection trees: a rectilinear minimum spanning tree over the
//! snapped terminals, improved by iterated 1-Steiner insertion on the Hanan
//! grid.

use eda_common::db::indices::TopoNodeId;
use eda_common::geom::coord::GridCoord;
use eda_common::util::config::TopologyRoot;
use priority_queue::PriorityQueue;
use rand::Rng;
use rand::seq::SliceRandom;
use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

/// Nets with more distinct terminal positions than this keep the plain MST.
const MAX_STEINER_PINS: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Source,
    Sink,
    Steiner,
}

#[derive(Clone, Debug)]
pub struct TopoNode {
    pub pos: GridCoord,
    pub kind: NodeKind,
    /// Indices of the net terminals that snapped onto this node.
    pub terminals: Vec<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("{0:?} is not a node of this topology")]
    UnknownNode(TopoNodeId),
    #[error("self loop on {0:?}")]
    SelfLoop(TopoNodeId),
    #[error("duplicate edge {0:?} - {1:?}")]
    DuplicateEdge(TopoNodeId, TopoNodeId),
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    nodes: Vec<TopoNode>,
    edges: Vec<(TopoNodeId, TopoNodeId)>,
    edge_keys: HashSet<(u32, u32)>,
    source: Option<TopoNodeId>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node. A second SOURCE demotes the previous one to SINK.
    pub fn add_node(&mut self, pos: GridCoord, kind: NodeKind) -> TopoNodeId {
        let id = TopoNodeId::new(self.nodes.len());
        if kind == NodeKind::Source {
            if let Some(prev) = self.source.replace(id) {
                log::debug!("Topology source {:?} re-tagged as sink", prev);
                self.nodes[prev.index()].kind = NodeKind::Sink;
            }
        }
        self.nodes.push(TopoNode {
            pos,
            kind,
            terminals: Vec::new(),
        });
        id
    }

    pub fn attach_terminal(&mut self, node: TopoNodeId, terminal: usize) {
        self.nodes[node.index()].terminals.push(terminal);
    }

    pub fn add_edge(&mut self, a: TopoNodeId, b: TopoNodeId) -> Result<(), TopologyError> {
        for n in [a, b] {
            if n.index() >= self.nodes.len() {
                return Err(TopologyError::UnknownNode(n));
            }
        }
        if a == b {
            return Err(TopologyError::SelfLoop(a));
        }
        let key = (a.0.min(b.0), a.0.max(b.0));
        if !self.edge_keys.insert(key) {
            return Err(TopologyError::DuplicateEdge(a, b));
        }
        self.edges.push((a, b));
        Ok(())
    }

    pub fn node(&self, id: TopoNodeId) -> &TopoNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[TopoNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(TopoNodeId, TopoNodeId)] {
        &self.edges
    }

    pub fn source(&self) -> Option<TopoNodeId> {
        self.source
    }

    pub fn degree(&self, id: TopoNodeId) -> usize {
        self.edges.iter().filter(|(a, b)| *a == id || *b == id).count()
    }

    pub fn terminal_node(&self, terminal: usize) -> Option<TopoNodeId> {
        self.nodes
            .iter()
            .position(|n| n.terminals.contains(&terminal))
            .map(TopoNodeId::new)
    }

    /// Rectilinear length, counting one unit per layer change.
    pub fn wirelength(&self) -> u64 {
        self.edges
            .iter()
            .map(|(a, b)| distance(self.node(*a).pos, self.node(*b).pos))
            .sum()
    }

    fn adjacency(&self) -> Vec<Vec<TopoNodeId>> {
        let mut adj = vec![Vec::new(); self.nodes.len()];
        for &(a, b) in &self.edges {
            adj[a.index()].push(b);
            adj[b.index()].push(a);
        }
        adj
    }

    /// Connected and acyclic over all registered nodes.
    pub fn is_tree(&self) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        if self.edges.len() + 1 != self.nodes.len() {
            return false;
        }
        let start = self.source.unwrap_or(TopoNodeId::new(0));
        self.connections_from(start).len() + 1 == self.nodes.len()
    }

    /// Tree edges oriented away from the source, in breadth-first order.
    pub fn connections(&self) -> Vec<(TopoNodeId, TopoNodeId)> {
        match self.source {
            Some(s) => self.connections_from(s),
            None => Vec::new(),
        }
    }

    fn connections_from(&self, start: TopoNodeId) -> Vec<(TopoNodeId, TopoNodeId)> {
        let adj = self.adjacency();
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::with_capacity(self.edges.len());
        let mut queue = VecDeque::from([start]);
        seen[start.index()] = true;
        while let Some(u) = queue.pop_front() {
            for &v in &adj[u.index()] {
                if !seen[v.index()] {
                    seen[v.index()] = true;
                    out.push((u, v));
                    queue.push_back(v);
                }
            }
        }
        out
    }
}

/// Classification of a net before routing.
#[derive(Clone, Debug)]
pub enum NetShape {
    /// Fewer than two terminals; nothing to connect.
    Trivial,
    /// All terminals share one grid node; only a marker is placed.
    FeedThrough(GridCoord),
    Tree(Topology),
}

fn distance(a: GridCoord, b: GridCoord) -> u64 {
    (a.planar_distance(&b) + a.layer_distance(&b)) as u64
}

/// Prim's algorithm with a decrease-key queue. Returns total length and
/// edges as index pairs into `points`.
fn minimum_spanning_tree(points: &[GridCoord]) -> (u64, Vec<(usize, usize)>) {
    let n = points.len();
    if n < 2 {
        return (0, Vec::new());
    }
    let mut in_tree = vec![false; n];
    let mut parent = vec![0usize; n];
    let mut pq: PriorityQueue<usize, Reverse<(u64, usize)>> = PriorityQueue::new();
    pq.push(0, Reverse((0, 0)));
    for i in 1..n {
        pq.push(i, Reverse((u64::MAX, i)));
    }

    let mut total = 0;
    let mut edges = Vec::with_capacity(n - 1);
    while let Some((u, Reverse((d, _)))) = pq.pop() {
        in_tree[u] = true;
        if u != 0 {
            total += d;
            edges.push((parent[u], u));
        }
        for v in 0..n {
            if in_tree[v] {
                continue;
            }
            let dv = distance(points[u], points[v]);
            let better = pq
                .get_priority(&v)
                .is_some_and(|Reverse((cur, _))| dv < *cur);
            if better {
                parent[v] = u;
                pq.change_priority(&v, Reverse((dv, v)));
            }
        }
    }
    (total, edges)
}

fn steiner_degrees(
    n_terminals: usize,
    n_points: usize,
    edges: &[(usize, usize)],
) -> Vec<(usize, usize)> {
    let mut degree = vec![0usize; n_points];
    for &(a, b) in edges {
        degree[a] += 1;
        degree[b] += 1;
    }
    (n_terminals..n_points).map(|i| (i, degree[i])).collect()
}

/// Iterated 1-Steiner: repeatedly add the Hanan point with the largest MST
/// reduction, then drop Steiner points left with degree two or less.
fn improve_with_steiner_points(
    terminals: &[GridCoord],
    steiner_layer: u8,
    rng: &mut impl Rng,
) -> (Vec<GridCoord>, Vec<(usize, usize)>) {
    let mut points = terminals.to_vec();
    let (mut best_len, mut best_edges) = minimum_spanning_tree(&points);

    let mut xs: Vec<u32> = terminals.iter().map(|c| c.x).collect();
    let mut ys: Vec<u32> = terminals.iter().map(|c| c.y).collect();
    xs.sort_unstable();
    xs.dedup();
    ys.sort_unstable();
    ys.dedup();
    let mut candidates: Vec<GridCoord> = xs
        .iter()
        .flat_map(|&x| ys.iter().map(move |&y| GridCoord::new(x, y, steiner_layer)))
        .collect();
    // Equal-gain candidates are decided by this seeded order.
    candidates.shuffle(rng);

    for _ in 0..terminals.len() {
        let mut winner: Option<(u64, GridCoord)> = None;
        for &cand in &candidates {
            if points.contains(&cand) {
                continue;
            }
            points.push(cand);
            let (len, _) = minimum_spanning_tree(&points);
            points.pop();
            if len < best_len && winner.is_none_or(|(w, _)| len < w) {
                winner = Some((len, cand));
            }
        }
        let Some((_, cand)) = winner else {
            break;
        };
        points.push(cand);

        loop {
            let (len, edges) = minimum_spanning_tree(&points);
            best_len = len;
            best_edges = edges;
            let weak = steiner_degrees(terminals.len(), points.len(), &best_edges)
                .into_iter()
                .find(|&(_, d)| d <= 2);
            match weak {
                Some((i, _)) => {
                    points.remove(i);
                }
                None => break,
            }
        }
    }
    (points, best_edges)
}

fn pick_root(
    positions: &[GridCoord],
    owners: &[usize],
    driver: usize,
    root: TopologyRoot,
) -> usize {
    match root {
        TopologyRoot::Driver => owners[driver],
        TopologyRoot::Centroid => {
            let n = positions.len() as u64;
            let cx = positions.iter().map(|c| c.x as u64).sum::<u64>() / n;
            let cy = positions.iter().map(|c| c.y as u64).sum::<u64>() / n;
            let centre = GridCoord::new(cx as u32, cy as u32, 0);
            (0..positions.len())
                .min_by_key(|&i| (positions[i].planar_distance(&centre), i))
                .unwrap_or(0)
        }
    }
}

/// Classifies a net and, when it needs wiring, builds its connection tree.
///
/// `terminals` are the snapped terminal nodes in net order; `driver` indexes
/// into them.
pub fn build_topology(
    terminals: &[GridCoord],
    driver: usize,
    root: TopologyRoot,
    rng: &mut impl Rng,
) -> NetShape {
    if terminals.len() < 2 {
        return NetShape::Trivial;
    }

    // One point per distinct grid node; `owners[t]` is terminal t's point.
    let mut positions: Vec<GridCoord> = Vec::with_capacity(terminals.len());
    let mut owners = Vec::with_capacity(terminals.len());
    for &t in terminals {
        match positions.iter().position(|&p| p == t) {
            Some(i) => owners.push(i),
            None => {
                owners.push(positions.len());
                positions.push(t);
            }
        }
    }
    if positions.len() == 1 {
        return NetShape::FeedThrough(positions[0]);
    }

    let driver = if driver < terminals.len() {
        driver
    } else {
        log::warn!("Driver index {} out of range; using terminal 0", driver);
        0
    };
    let root_point = pick_root(&positions, &owners, driver, root);

    let (points, edges) = if positions.len() <= MAX_STEINER_PINS {
        improve_with_steiner_points(&positions, positions[root_point].z, rng)
    } else {
        let (_, edges) = minimum_spanning_tree(&positions);
        (positions.clone(), edges)
    };

    let mut topo = Topology::new();
    let ids: Vec<TopoNodeId> = points
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let kind = if i == root_point {
                NodeKind::Source
            } else if i < positions.len() {
                NodeKind::Sink
            } else {
                NodeKind::Steiner
            };
            topo.add_node(p, kind)
        })
        .collect();
    for (t, &owner) in owners.iter().enumerate() {
        topo.attach_terminal(ids[owner], t);
    }
    for (a, b) in edges {
        if let Err(e) = topo.add_edge(ids[a], ids[b]) {
            log::warn!("Dropping topology edge: {}", e);
        }
    }
    NetShape::Tree(topo)
}
