//! Net and segment arenas. Nets and segments refer to each other only by
//! integer handles.

use crate::grid::{GridBox, GridEdge};
use crate::topology::Topology;
use eda_common::db::core::AccessPoint;
use eda_common::db::indices::{NetId, SegmentId, TopoNodeId};
use eda_common::geom::coord::GridCoord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetStatus {
    Pending,
    Routed,
    RippedUp,
    /// Ripped up and not yet routed again (unroutable, abandoned or out of time).
    Unresolved,
    Trivial,
    FeedThrough,
    Malformed,
    Final,
}

/// A terminal after access-point selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinAccess {
    pub access: AccessPoint,
    pub node: GridCoord,
}

#[derive(Clone, Debug)]
pub struct NetState {
    pub id: NetId,
    pub name: String,
    pub status: NetStatus,
    pub pins: Vec<PinAccess>,
    pub topology: Option<Topology>,
    /// Grid node carrying the marker of a feed-through net.
    pub marker: Option<GridCoord>,
    pub bbox: Option<GridBox>,
    pub ripup_count: u32,
    pub problem: Option<String>,
}

impl NetState {
    pub fn new(id: NetId, name: String) -> Self {
        Self {
            id,
            name,
            status: NetStatus::Pending,
            pins: Vec::new(),
            topology: None,
            marker: None,
            bbox: None,
            ripup_count: 0,
            problem: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NetArena {
    nets: Vec<NetState>,
}

impl NetArena {
    pub fn push(&mut self, net: NetState) -> NetId {
        let id = NetId::new(self.nets.len());
        self.nets.push(net);
        id
    }

    pub fn get(&self, id: NetId) -> &NetState {
        &self.nets[id.index()]
    }

    pub fn get_mut(&mut self, id: NetId) -> &mut NetState {
        &mut self.nets[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetState> {
        self.nets.iter()
    }

    pub fn ids_with(&self, status: NetStatus) -> Vec<NetId> {
        self.nets
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.id)
            .collect()
    }
}

/// Routed path between two topology nodes and the edges it consumes.
#[derive(Clone, Debug)]
pub struct Segment {
    pub net: NetId,
    pub from: TopoNodeId,
    pub to: TopoNodeId,
    pub path: Vec<GridCoord>,
    // Sorted for lookup.
    edges: Vec<GridEdge>,
}

impl Segment {
    pub fn new(net: NetId, from: TopoNodeId, to: TopoNodeId, path: Vec<GridCoord>) -> Self {
        let mut edges: Vec<GridEdge> = path
            .windows(2)
            .filter_map(|w| GridEdge::between(w[0], w[1]))
            .collect();
        edges.sort_unstable();
        Self {
            net,
            from,
            to,
            path,
            edges,
        }
    }

    pub fn edges(&self) -> &[GridEdge] {
        &self.edges
    }

    pub fn uses_edge(&self, edge: GridEdge) -> bool {
        self.edges.binary_search(&edge).is_ok()
    }
}

/// Slot arena; freed handles are recycled.
#[derive(Clone, Debug, Default)]
pub struct SegmentArena {
    slots: Vec<Option<Segment>>,
    free: Vec<SegmentId>,
    live: usize,
}

impl SegmentArena {
    /// Empty arena whose handles never collide with the live or freed
    /// handles of `other`.
    pub fn continuing(other: &SegmentArena) -> Self {
        Self {
            slots: (0..other.slots.len()).map(|_| None).collect(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, segment: Segment) -> SegmentId {
        self.live += 1;
        match self.free.pop() {
            Some(id) => {
                self.slots[id.index()] = Some(segment);
                id
            }
            None => {
                self.slots.push(Some(segment));
                SegmentId::new(self.slots.len() - 1)
            }
        }
    }

    pub fn remove(&mut self, id: SegmentId) -> Option<Segment> {
        let seg = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id);
        self.live -= 1;
        Some(seg)
    }

    pub fn get(&self, id: SegmentId) -> Option<&Segment> {
        self.slots.get(id.index()).and_then(|s| s.as_ref())
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (SegmentId, &Segment)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (SegmentId::new(i), s)))
    }
}
