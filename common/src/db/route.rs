//! Routing results handed to downstream stages: per-net wires and vias in
//! database units, and the per-cell congestion report.

use crate::db::indices::NetId;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use std::collections::BTreeMap;

/// A straight wire. Endpoints are gcell centres; a wire never changes layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WireSegment {
    pub start_x: i64,
    pub start_y: i64,
    pub start_layer: u8,
    pub end_x: i64,
    pub end_y: i64,
    pub end_layer: u8,
}

impl WireSegment {
    pub fn length(&self) -> i64 {
        (self.end_x - self.start_x).abs() + (self.end_y - self.start_y).abs()
    }

    pub fn bbox(&self) -> Rect {
        Rect::from_corners(
            Point::new(self.start_x, self.start_y),
            Point::new(self.end_x, self.end_y),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViaPlacement {
    pub x: i64,
    pub y: i64,
    pub lower_layer: u8,
    pub name: String,
}

/// Location where the route meets one of the net's terminals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinAnchor {
    pub x: i64,
    pub y: i64,
    pub layer: u8,
}

#[derive(Clone, Debug, Default)]
pub struct NetRoute {
    pub name: String,
    pub wires: Vec<WireSegment>,
    pub vias: Vec<ViaPlacement>,
    pub anchors: Vec<PinAnchor>,
}

impl NetRoute {
    pub fn wirelength(&self) -> i64 {
        self.wires.iter().map(|w| w.length()).sum()
    }

    /// One guide box per wire and per via layer, expanded by `margin`.
    pub fn guides(&self, margin: i64) -> Vec<(u8, Rect)> {
        let mut boxes = Vec::with_capacity(self.wires.len() + self.vias.len() * 2);
        for w in &self.wires {
            boxes.push((w.start_layer, w.bbox().expanded(margin)));
        }
        for v in &self.vias {
            let r = Rect::from_point(Point::new(v.x, v.y)).expanded(margin);
            boxes.push((v.lower_layer, r));
            boxes.push((v.lower_layer + 1, r));
        }
        if boxes.is_empty() {
            for a in &self.anchors {
                boxes.push((a.layer, Rect::from_point(Point::new(a.x, a.y)).expanded(margin)));
            }
        }
        boxes
    }
}

#[derive(Clone, Debug, Default)]
pub struct RouteMap {
    pub nets: BTreeMap<NetId, NetRoute>,
}

impl RouteMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, net: NetId, route: NetRoute) {
        self.nets.insert(net, route);
    }

    pub fn get(&self, net: NetId) -> Option<&NetRoute> {
        self.nets.get(&net)
    }

    pub fn len(&self) -> usize {
        self.nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NetId, &NetRoute)> {
        self.nets.iter()
    }

    pub fn total_wirelength(&self) -> i64 {
        self.nets.values().map(|r| r.wirelength()).sum()
    }

    pub fn total_vias(&self) -> usize {
        self.nets.values().map(|r| r.vias.len()).sum()
    }
}

/// Supply and usage of one gcell on one layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CongestionCell {
    pub x: u32,
    pub y: u32,
    pub layer: u8,
    pub horizontal_capacity: u32,
    pub vertical_capacity: u32,
    pub horizontal_usage: u32,
    pub vertical_usage: u32,
}

impl CongestionCell {
    pub fn utilization(&self) -> f64 {
        let ratio = |usage: u32, cap: u32| {
            if cap == 0 {
                if usage > 0 { f64::INFINITY } else { 0.0 }
            } else {
                usage as f64 / cap as f64
            }
        };
        ratio(self.horizontal_usage, self.horizontal_capacity)
            .max(ratio(self.vertical_usage, self.vertical_capacity))
    }
}

pub trait CongestionSink {
    fn report(&mut self, cell: CongestionCell);
}

impl CongestionSink for Vec<CongestionCell> {
    fn report(&mut self, cell: CongestionCell) {
        self.push(cell);
    }
}
