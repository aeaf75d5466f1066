//! Derives per-edge track supply from the technology description.

use super::dense::VIA_CAPACITY;
use super::{EdgeDir, GridEdge, GridGraph, RoutingGrid};
use crate::error::RouteError;
use crate::utils::conversion::GridConverter;
use eda_common::db::core::LayerDirection;
use eda_common::db::tech::TechnologyProvider;
use eda_common::geom::coord::GridCoord;
use eda_common::util::config::{ConfigError, RoutingConfig};

/// Effective `[min, max]` routing layers. A maximum above the top layer is
/// clamped; a minimum above it is a configuration error.
pub fn routing_layer_range(
    config: &RoutingConfig,
    num_layers: usize,
) -> Result<(u8, u8), RouteError> {
    if num_layers == 0 {
        return Err(RouteError::NoLayers);
    }
    config.validate()?;
    if config.min_routing_layer as usize >= num_layers {
        return Err(ConfigError::LayerOutOfRange {
            layer: config.min_routing_layer,
            available: num_layers,
        }
        .into());
    }
    let top = (num_layers - 1) as u8;
    if config.max_routing_layer > top {
        log::warn!(
            "max_routing_layer {} exceeds top layer {}; clamping",
            config.max_routing_layer,
            top
        );
    }
    Ok((config.min_routing_layer, config.max_routing_layer.min(top)))
}

fn tracks_for(
    tech: &(impl TechnologyProvider + ?Sized),
    layer: u8,
    direction: LayerDirection,
    gcell_size: i64,
) -> u32 {
    if let Some(tracks) = tech.base_capacity(layer, direction) {
        return tracks;
    }
    let pitch = tech.pitch(layer);
    if pitch <= 0 {
        log::warn!("Layer {} has no pitch; treating it as blocked", layer);
        return 0;
    }
    (gcell_size / pitch) as u32
}

/// `(horizontal, vertical)` tracks per gcell for one layer.
fn layer_supply(
    tech: &(impl TechnologyProvider + ?Sized),
    layer: u8,
    config: &RoutingConfig,
) -> (u32, u32) {
    let keep = 1.0 - config.global_capacity_adjustment;
    let scale = |tracks: u32| (tracks as f64 * keep).floor() as u32;
    let tracks = |d| tracks_for(tech, layer, d, config.gcell_size);

    let (horizontal, vertical) = match tech.layer_direction(layer) {
        LayerDirection::Horizontal => {
            let along = tracks(LayerDirection::Horizontal);
            let across = if config.unidirectional_routing {
                0
            } else {
                tech.base_capacity(layer, LayerDirection::Vertical).unwrap_or(along)
            };
            (along, across)
        }
        LayerDirection::Vertical => {
            let along = tracks(LayerDirection::Vertical);
            let across = if config.unidirectional_routing {
                0
            } else {
                tech.base_capacity(layer, LayerDirection::Horizontal).unwrap_or(along)
            };
            (across, along)
        }
        LayerDirection::Unknown => (
            tracks(LayerDirection::Horizontal),
            tracks(LayerDirection::Vertical),
        ),
    };
    (scale(horizontal), scale(vertical))
}

pub fn build_grid(
    tech: &(impl TechnologyProvider + ?Sized),
    converter: &GridConverter,
    config: &RoutingConfig,
) -> Result<GridGraph, RouteError> {
    let num_layers = tech.num_layers();
    let (min_layer, max_layer) = routing_layer_range(config, num_layers)?;

    let directions = (0..num_layers as u8).map(|l| tech.layer_direction(l)).collect();
    let (w, h) = (converter.grid_width(), converter.grid_height());
    let mut grid = GridGraph::new(w, h, num_layers as u8, directions);
    grid.set_congestion_threshold(config.congestion_threshold);

    for z in min_layer..=max_layer {
        let (horizontal, vertical) = layer_supply(tech, z, config);
        log::debug!(
            "Layer {}: {} horizontal / {} vertical tracks per gcell",
            z,
            horizontal,
            vertical
        );
        for y in 0..h {
            for x in 0..w {
                let c = GridCoord::new(x, y, z);
                grid.set_capacity(GridEdge::new(c, EdgeDir::East), horizontal);
                grid.set_capacity(GridEdge::new(c, EdgeDir::North), vertical);
                if z < max_layer {
                    grid.set_capacity(GridEdge::new(c, EdgeDir::Up), VIA_CAPACITY);
                }
            }
        }
    }

    for region in tech.region_reductions() {
        if region.layer < min_layer || region.layer > max_layer {
            continue;
        }
        let keep = 1.0 - region.reduction.clamp(0.0, 1.0);
        let Some((xs, ys)) = converter.cells_overlapping(&region.rect) else {
            continue;
        };
        for y in ys {
            for x in xs.clone() {
                let c = GridCoord::new(x, y, region.layer);
                for dir in [EdgeDir::East, EdgeDir::North] {
                    let e = GridEdge::new(c, dir);
                    let cap = grid.capacity(e);
                    grid.set_capacity(e, (cap as f64 * keep).floor() as u32);
                }
            }
        }
    }

    log::info!(
        "Routing grid {}x{}x{} (layers {}..={}), threshold {:.2}",
        w,
        h,
        num_layers,
        min_layer,
        max_layer,
        config.congestion_threshold
    );
    Ok(grid)
}
