use crate::db::core::{AccessPoint, Design, LayerDirection};
use crate::db::tech::TechData;
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shape of a synthetic benchmark. All sizes are in gcells except
/// `gcell_size`, which is in database units.
#[derive(Clone, Debug)]
pub struct GeneratorParams {
    pub name: String,
    pub grid_width: u32,
    pub grid_height: u32,
    pub gcell_size: i64,
    pub num_layers: u8,
    pub tracks_per_gcell: u32,
    pub num_nets: usize,
    pub max_fanout: usize,
    /// Maximum distance of a sink from its driver.
    pub locality: u32,
    pub seed: u64,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            grid_width: 32,
            grid_height: 32,
            gcell_size: 3000,
            num_layers: 4,
            tracks_per_gcell: 10,
            num_nets: 200,
            max_fanout: 4,
            locality: 8,
            seed: 1,
        }
    }
}

/// Builds a random design. The same parameters always produce the same design.
pub fn generate_random_design(params: &GeneratorParams) -> Design {
    let mut rng = StdRng::seed_from_u64(params.seed);

    let die_w = params.grid_width as i64 * params.gcell_size;
    let die_h = params.grid_height as i64 * params.gcell_size;
    let die_area = Rect::new(Point::new(0, 0), Point::new(die_w, die_h));

    let pitch = (params.gcell_size / params.tracks_per_gcell.max(1) as i64).max(1);
    let mut tech = TechData::default();
    for l in 0..params.num_layers {
        let direction = if l % 2 == 0 {
            LayerDirection::Horizontal
        } else {
            LayerDirection::Vertical
        };
        tech.add_layer(format!("M{}", l + 1), direction, pitch, pitch / 2);
        if l + 1 < params.num_layers {
            tech.add_via(format!("VIA{}{}", l + 1, l + 2), l);
        }
    }

    log::info!(
        "Generating Benchmark: {} nets, Grid: {}x{}x{}, Die: {}x{}",
        params.num_nets,
        params.grid_width,
        params.grid_height,
        params.num_layers,
        die_w,
        die_h
    );

    let mut design = Design::new(params.name.clone(), die_area, tech);
    let random_point = |rng: &mut StdRng, cx: u32, cy: u32, radius: u32| {
        let lo_x = cx.saturating_sub(radius);
        let hi_x = (cx + radius).min(params.grid_width - 1);
        let lo_y = cy.saturating_sub(radius);
        let hi_y = (cy + radius).min(params.grid_height - 1);
        let gx = rng.gen_range(lo_x..=hi_x) as i64;
        let gy = rng.gen_range(lo_y..=hi_y) as i64;
        // Somewhere inside the chosen gcell, not necessarily its centre.
        let off_x = rng.gen_range(0..params.gcell_size);
        let off_y = rng.gen_range(0..params.gcell_size);
        Point::new(
            gx * params.gcell_size + off_x,
            gy * params.gcell_size + off_y,
        )
    };

    for i in 0..params.num_nets {
        let net = design.add_net(format!("net{}", i));
        let fanout = rng.gen_range(1..=params.max_fanout.max(1));
        let cx = rng.gen_range(0..params.grid_width);
        let cy = rng.gen_range(0..params.grid_height);

        for t in 0..=fanout {
            let pos = if t == 0 {
                Point::new(
                    cx as i64 * params.gcell_size + params.gcell_size / 2,
                    cy as i64 * params.gcell_size + params.gcell_size / 2,
                )
            } else {
                random_point(&mut rng, cx, cy, params.locality)
            };
            let layer = if params.num_layers > 1 && rng.gen_bool(0.2) { 1 } else { 0 };
            design.add_terminal(net, format!("t{}", t), vec![AccessPoint { pos, layer }]);
        }
    }

    design
}
