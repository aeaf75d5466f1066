use super::rect::Rect;
use rstar::{AABB, RTree, RTreeObject};

/// Rectangle-keyed R-tree. Entries are `(rect, item)` pairs and queries use
/// closed intersection, so shapes that merely touch the query are reported.
pub struct SpatialIndex<T> {
    tree: RTree<IndexedRect<T>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexedRect<T> {
    pub rect: Rect,
    pub item: T,
}

impl<T> RTreeObject for IndexedRect<T> {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        to_aabb(&self.rect)
    }
}

fn to_aabb(rect: &Rect) -> AABB<[i64; 2]> {
    AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y])
}

impl<T: PartialEq> SpatialIndex<T> {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    pub fn bulk_load(entries: Vec<(Rect, T)>) -> Self {
        let items = entries
            .into_iter()
            .map(|(rect, item)| IndexedRect { rect, item })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn insert(&mut self, rect: Rect, item: T) {
        self.tree.insert(IndexedRect { rect, item });
    }

    /// Removes one entry equal to `(rect, item)`. Returns false when absent.
    pub fn remove(&mut self, rect: Rect, item: T) -> bool {
        self.tree.remove(&IndexedRect { rect, item }).is_some()
    }

    pub fn query(&self, rect: Rect) -> impl Iterator<Item = &IndexedRect<T>> {
        self.tree.locate_in_envelope_intersecting(&to_aabb(&rect))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedRect<T>> {
        self.tree.iter()
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl<T: PartialEq> Default for SpatialIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::point::Point;

    fn rect(x0: i64, y0: i64, x1: i64, y1: i64) -> Rect {
        Rect::new(Point::new(x0, y0), Point::new(x1, y1))
    }

    #[test]
    fn insert_query_remove() {
        let mut index = SpatialIndex::new();
        index.insert(rect(0, 0, 10, 10), 1u32);
        index.insert(rect(20, 20, 30, 30), 2u32);

        let hits: Vec<u32> = index.query(rect(10, 10, 15, 15)).map(|e| e.item).collect();
        assert_eq!(hits, vec![1]);

        assert!(index.remove(rect(0, 0, 10, 10), 1));
        assert!(!index.remove(rect(0, 0, 10, 10), 1));
        assert_eq!(index.query(rect(0, 0, 15, 15)).count(), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn bulk_load_matches_incremental() {
        let entries: Vec<(Rect, usize)> = (0..50)
            .map(|i| {
                let x = (i as i64 * 7) % 100;
                let y = (i as i64 * 13) % 100;
                (rect(x, y, x + 5, y + 5), i)
            })
            .collect();

        let bulk = SpatialIndex::bulk_load(entries.clone());
        let mut incremental = SpatialIndex::new();
        for (r, i) in &entries {
            incremental.insert(*r, *i);
        }

        let probe = rect(20, 20, 60, 60);
        let mut a: Vec<usize> = bulk.query(probe).map(|e| e.item).collect();
        let mut b: Vec<usize> = incremental.query(probe).map(|e| e.item).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
