//! Per-layer R-tree of committed wire, via and marker shapes.

use crate::utils::conversion::GridConverter;
use eda_common::db::indices::{NetId, SegmentId};
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::geom::rtree::SpatialIndex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShapeOwner {
    pub net: NetId,
    /// `None` for shapes that belong to the net but not to a segment
    /// (feed-through markers).
    pub segment: Option<SegmentId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    PathSegment { layer: u8, rect: Rect },
    Via { lower_layer: u8, at: Point<i64>, half_size: i64 },
    Patch { layer: u8, rect: Rect },
}

impl Shape {
    pub fn bbox(&self) -> Rect {
        match *self {
            Shape::PathSegment { rect, .. } | Shape::Patch { rect, .. } => rect,
            Shape::Via { at, half_size, .. } => Rect::from_point(at).expanded(half_size),
        }
    }

    /// Lowest and highest layer the shape occupies.
    pub fn layers(&self) -> (u8, u8) {
        match *self {
            Shape::PathSegment { layer, .. } | Shape::Patch { layer, .. } => (layer, layer),
            Shape::Via { lower_layer, .. } => (lower_layer, lower_layer + 1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Entry {
    shape: Shape,
    owner: ShapeOwner,
}

pub struct RegionQueryIndex {
    layers: Vec<SpatialIndex<Entry>>,
}

impl RegionQueryIndex {
    pub fn new(num_layers: u8) -> Self {
        Self {
            layers: (0..num_layers).map(|_| SpatialIndex::new()).collect(),
        }
    }

    pub fn num_layers(&self) -> u8 {
        self.layers.len() as u8
    }

    pub fn insert(&mut self, shape: Shape, owner: ShapeOwner) {
        let (lo, hi) = shape.layers();
        for layer in lo..=hi {
            match self.layers.get_mut(layer as usize) {
                Some(tree) => tree.insert(shape.bbox(), Entry { shape, owner }),
                None => log::warn!("Shape {:?} on layer {} outside the index", shape, layer),
            }
        }
    }

    /// Removes one `(shape, owner)` entry. Returns false if it was not present.
    pub fn remove(&mut self, shape: Shape, owner: ShapeOwner) -> bool {
        let (lo, hi) = shape.layers();
        let mut removed = false;
        for layer in lo..=hi {
            if let Some(tree) = self.layers.get_mut(layer as usize) {
                removed |= tree.remove(shape.bbox(), Entry { shape, owner });
            }
        }
        removed
    }

    /// Owners of every shape on `layer` whose box intersects `rect`, touching
    /// included.
    pub fn query(&self, rect: Rect, layer: u8) -> Vec<ShapeOwner> {
        self.query_shapes(rect, layer).into_iter().map(|(_, o)| o).collect()
    }

    pub fn query_shapes(&self, rect: Rect, layer: u8) -> Vec<(Shape, ShapeOwner)> {
        match self.layers.get(layer as usize) {
            Some(tree) => tree
                .query(rect)
                .map(|e| (e.item.shape, e.item.owner))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Replaces the whole index by bulk-loading `shapes`.
    pub fn rebuild(&mut self, shapes: Vec<(Shape, ShapeOwner)>) {
        let mut per_layer: Vec<Vec<(Rect, Entry)>> = vec![Vec::new(); self.layers.len()];
        for (shape, owner) in shapes {
            let (lo, hi) = shape.layers();
            for layer in lo..=hi {
                if let Some(bucket) = per_layer.get_mut(layer as usize) {
                    bucket.push((shape.bbox(), Entry { shape, owner }));
                }
            }
        }
        self.layers = per_layer.into_iter().map(SpatialIndex::bulk_load).collect();
    }

    /// Independent index holding the shapes that intersect `rect`.
    pub fn extract(&self, rect: Rect) -> RegionQueryIndex {
        let layers = self
            .layers
            .iter()
            .map(|tree| {
                let entries = tree.query(rect).map(|e| (e.rect, e.item)).collect();
                SpatialIndex::bulk_load(entries)
            })
            .collect();
        RegionQueryIndex { layers }
    }

    /// Entries over all layers; a via counts once per layer it touches.
    pub fn len(&self) -> usize {
        self.layers.iter().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decomposes a grid path into maximal straight runs and vias, in database
/// units.
pub fn shapes_for_path(
    path: &[GridCoord],
    converter: &GridConverter,
    half_width: i64,
) -> Vec<Shape> {
    let mut shapes = Vec::new();
    if path.len() < 2 {
        return shapes;
    }

    let mut run_start = 0;
    for i in 1..path.len() {
        let (a, b) = (path[i - 1], path[i]);
        if a.z != b.z {
            if i - 1 > run_start {
                shapes.push(run_shape(path[run_start], a, converter, half_width));
            }
            shapes.push(Shape::Via {
                lower_layer: a.z.min(b.z),
                at: converter.to_world(a),
                half_size: half_width,
            });
            run_start = i;
            continue;
        }
        let turns = i + 1 < path.len() && {
            let c = path[i + 1];
            c.z == b.z && (a.x == b.x) != (b.x == c.x)
        };
        if turns {
            shapes.push(run_shape(path[run_start], b, converter, half_width));
            run_start = i;
        }
    }
    let last = path.len() - 1;
    if last > run_start {
        shapes.push(run_shape(path[run_start], path[last], converter, half_width));
    }
    shapes
}

fn run_shape(a: GridCoord, b: GridCoord, converter: &GridConverter, half_width: i64) -> Shape {
    Shape::PathSegment {
        layer: a.z,
        rect: Rect::from_corners(converter.to_world(a), converter.to_world(b)).expanded(half_width),
    }
}
