use crate::db::route::{CongestionCell, CongestionSink, RouteMap};
use crate::geom::rect::Rect;
use image::{ImageResult, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect as ImageRect;
use std::path::Path;

/// Congestion sink that keeps the worst utilisation over all layers of each
/// gcell and renders it as a heat map.
pub struct HeatmapSink {
    width: u32,
    height: u32,
    worst: Vec<f64>,
}

impl HeatmapSink {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            worst: vec![0.0; (width * height) as usize],
        }
    }

    pub fn utilization(&self, x: u32, y: u32) -> f64 {
        self.worst[(y * self.width + x) as usize]
    }

    pub fn save(&self, filename: &str, scale: u32) -> ImageResult<()> {
        let scale = scale.max(1);
        let mut img = RgbImage::from_pixel(self.width * scale, self.height * scale, Rgb([0, 0, 0]));

        for y in 0..self.height {
            for x in 0..self.width {
                let color = heat_color(self.utilization(x, y));
                // Row 0 is the bottom of the die.
                let py = (self.height - 1 - y) * scale;
                let rect = ImageRect::at((x * scale) as i32, py as i32).of_size(scale, scale);
                draw_filled_rect_mut(&mut img, rect, color);
            }
        }
        img.save(Path::new(filename))
    }
}

impl CongestionSink for HeatmapSink {
    fn report(&mut self, cell: CongestionCell) {
        if cell.x >= self.width || cell.y >= self.height {
            return;
        }
        let slot = &mut self.worst[(cell.y * self.width + cell.x) as usize];
        let util = cell.utilization();
        if util > *slot {
            *slot = util;
        }
    }
}

fn heat_color(util: f64) -> Rgb<u8> {
    if util > 1.0 {
        return Rgb([255, 255, 255]);
    }
    let t = util.clamp(0.0, 1.0);
    let lerp = |a: f64, b: f64| (a + (b - a) * t) as u8;
    Rgb([lerp(20.0, 255.0), lerp(40.0, 40.0), lerp(120.0, 20.0)])
}

pub fn draw_routes(
    die_area: &Rect,
    routes: &RouteMap,
    filename: &str,
    width: u32,
    height: u32,
) -> ImageResult<()> {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));

    let die_w = die_area.width();
    let die_h = die_area.height();
    if die_w <= 0 || die_h <= 0 {
        return img.save(Path::new(filename));
    }

    let scale_x = width as f64 / die_w as f64;
    let scale_y = height as f64 / die_h as f64;
    let map = |x: i64, y: i64| {
        (
            ((x - die_area.min.x) as f64 * scale_x) as f32,
            (height as f64 - (y - die_area.min.y) as f64 * scale_y) as f32,
        )
    };

    let colors = [
        // M1: Blue
        Rgba([0, 110, 255, 90]),
        // M2: Red
        Rgba([255, 20, 80, 90]),
        // M3: Green
        Rgba([0, 255, 100, 170]),
        // M4: Gold
        Rgba([255, 215, 0, 170]),
        // M5: Violet
        Rgba([180, 50, 255, 190]),
        // M6: Cyan
        Rgba([0, 240, 255, 190]),
    ];

    let mut wires: Vec<_> = routes.nets.values().flat_map(|r| r.wires.iter()).collect();
    wires.sort_by_key(|w| w.start_layer);
    for w in wires {
        let color = colors[(w.start_layer as usize).min(colors.len() - 1)];
        draw_line_segment_mut(&mut img, map(w.start_x, w.start_y), map(w.end_x, w.end_y), color);
    }

    let via_color = Rgba([255, 255, 255, 200]);
    for via in routes.nets.values().flat_map(|r| r.vias.iter()) {
        let (x, y) = map(via.x, via.y);
        let rect = ImageRect::at(x as i32 - 1, y as i32 - 1).of_size(3, 3);
        draw_filled_rect_mut(&mut img, rect, via_color);
    }

    img.save(Path::new(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heatmap_keeps_worst_layer() {
        let mut sink = HeatmapSink::new(2, 2);
        sink.report(CongestionCell {
            x: 1,
            y: 0,
            layer: 0,
            horizontal_capacity: 4,
            horizontal_usage: 1,
            ..Default::default()
        });
        sink.report(CongestionCell {
            x: 1,
            y: 0,
            layer: 1,
            vertical_capacity: 2,
            vertical_usage: 2,
            ..Default::default()
        });
        sink.report(CongestionCell {
            x: 5,
            y: 5,
            ..Default::default()
        });
        assert!((sink.utilization(1, 0) - 1.0).abs() < 1e-9);
        assert_eq!(sink.utilization(0, 0), 0.0);
    }

    #[test]
    fn overflow_renders_white() {
        assert_eq!(heat_color(1.5), Rgb([255, 255, 255]));
        assert_eq!(heat_color(0.0), Rgb([20, 40, 120]));
    }
}
