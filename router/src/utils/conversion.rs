use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use std::ops::RangeInclusive;

/// Maps database units to gcells and back. Cell `(i, j)` covers
/// `[origin + i * pitch, origin + (i + 1) * pitch)`; `to_world` returns its
/// centre, so `to_grid(to_world(c)) == c` for every cell of the grid.
#[derive(Clone, Copy, Debug)]
pub struct GridConverter {
    origin: Point<i64>,
    pitch: i64,
    grid_w: u32,
    grid_h: u32,
}

impl GridConverter {
    pub fn new(die_area: &Rect, pitch: i64) -> Self {
        let pitch = pitch.max(1);
        let cells = |extent: i64| (((extent + pitch - 1) / pitch).max(1)) as u32;
        Self {
            origin: die_area.min,
            pitch,
            grid_w: cells(die_area.width()),
            grid_h: cells(die_area.height()),
        }
    }

    pub fn grid_width(&self) -> u32 {
        self.grid_w
    }

    pub fn grid_height(&self) -> u32 {
        self.grid_h
    }

    pub fn pitch(&self) -> i64 {
        self.pitch
    }

    /// Cell containing `p`, or `None` when `p` lies outside the grid.
    pub fn try_to_grid(&self, p: Point<i64>, layer: u8) -> Option<GridCoord> {
        let dx = p.x - self.origin.x;
        let dy = p.y - self.origin.y;
        if dx < 0 || dy < 0 {
            return None;
        }
        let x = dx / self.pitch;
        let y = dy / self.pitch;
        if x >= self.grid_w as i64 || y >= self.grid_h as i64 {
            return None;
        }
        Some(GridCoord::new(x as u32, y as u32, layer))
    }

    /// Like [`GridConverter::try_to_grid`] but clamps onto the border cells.
    pub fn to_grid(&self, p: Point<i64>, layer: u8) -> GridCoord {
        let x = ((p.x - self.origin.x).div_euclid(self.pitch)).clamp(0, self.grid_w as i64 - 1);
        let y = ((p.y - self.origin.y).div_euclid(self.pitch)).clamp(0, self.grid_h as i64 - 1);
        GridCoord::new(x as u32, y as u32, layer)
    }

    pub fn to_world(&self, g: GridCoord) -> Point<i64> {
        Point::new(
            self.origin.x + g.x as i64 * self.pitch + self.pitch / 2,
            self.origin.y + g.y as i64 * self.pitch + self.pitch / 2,
        )
    }

    pub fn cell_rect(&self, x: u32, y: u32) -> Rect {
        let min = Point::new(
            self.origin.x + x as i64 * self.pitch,
            self.origin.y + y as i64 * self.pitch,
        );
        Rect::new(min, Point::new(min.x + self.pitch, min.y + self.pitch))
    }

    /// Cells whose area overlaps the interior of `rect`.
    pub fn cells_overlapping(
        &self,
        rect: &Rect,
    ) -> Option<(RangeInclusive<u32>, RangeInclusive<u32>)> {
        let lo_x = (rect.min.x - self.origin.x).div_euclid(self.pitch).max(0);
        let lo_y = (rect.min.y - self.origin.y).div_euclid(self.pitch).max(0);
        // Exclusive upper edge: a rect ending exactly on a cell border does not reach into it.
        let hi_x = (rect.max.x - self.origin.x - 1)
            .div_euclid(self.pitch)
            .min(self.grid_w as i64 - 1);
        let hi_y = (rect.max.y - self.origin.y - 1)
            .div_euclid(self.pitch)
            .min(self.grid_h as i64 - 1);
        if lo_x > hi_x || lo_y > hi_y {
            return None;
        }
        Some((lo_x as u32..=hi_x as u32, lo_y as u32..=hi_y as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> GridConverter {
        let die = Rect::new(Point::new(-500, 1000), Point::new(9500, 7000));
        GridConverter::new(&die, 1000)
    }

    #[test]
    fn round_trip_is_exact() {
        let conv = converter();
        assert_eq!(conv.grid_width(), 10);
        assert_eq!(conv.grid_height(), 6);
        for x in 0..conv.grid_width() {
            for y in 0..conv.grid_height() {
                let c = GridCoord::new(x, y, 2);
                assert_eq!(conv.to_grid(conv.to_world(c), 2), c);
                assert_eq!(conv.try_to_grid(conv.to_world(c), 2), Some(c));
            }
        }
    }

    #[test]
    fn outside_points_clamp_or_fail() {
        let conv = converter();
        let p = Point::new(-10_000, 50_000);
        assert_eq!(conv.try_to_grid(p, 0), None);
        assert_eq!(conv.to_grid(p, 0), GridCoord::new(0, 5, 0));
    }

    #[test]
    fn overlapping_cells_respect_borders() {
        let conv = converter();
        let r = Rect::new(Point::new(-500, 1000), Point::new(1500, 2000));
        let (xs, ys) = conv.cells_overlapping(&r).unwrap();
        assert_eq!(xs, 0..=1);
        assert_eq!(ys, 0..=0);

        let outside = Rect::new(Point::new(20_000, 20_000), Point::new(21_000, 21_000));
        assert!(conv.cells_overlapping(&outside).is_none());
    }
}
