use crate::db::core::{LayerData, LayerDirection};
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViaDef {
    pub name: String,
    /// The via connects `lower_layer` and `lower_layer + 1`.
    pub lower_layer: u8,
}

/// Explicit track count for one layer and direction, bypassing the pitch rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapacityOverride {
    pub layer: u8,
    pub direction: LayerDirection,
    pub tracks: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PitchOverride {
    pub layer: u8,
    pub pitch: i64,
}

/// Removes `reduction` (0..=1) of the capacity on `layer` inside `rect`.
/// A reduction of 1.0 is a full routing blockage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionReduction {
    pub rect: Rect,
    pub layer: u8,
    pub reduction: f64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CapacityAdjustments {
    #[serde(default)]
    pub pitch_overrides: Vec<PitchOverride>,
    #[serde(default)]
    pub regions: Vec<RegionReduction>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TechData {
    #[serde(default)]
    pub layers: Vec<LayerData>,
    #[serde(default)]
    pub vias: Vec<ViaDef>,
    #[serde(default)]
    pub capacity_overrides: Vec<CapacityOverride>,
    #[serde(default)]
    pub adjustments: CapacityAdjustments,
}

/// Routing rules the router consumes: layers, track supply and vias.
pub trait TechnologyProvider {
    fn layers(&self) -> &[LayerData];

    /// Explicit track count for `layer` in `direction`, if the technology
    /// pins one. `None` means the count is derived from the layer pitch.
    fn base_capacity(&self, layer: u8, direction: LayerDirection) -> Option<u32>;

    fn via_name(&self, lower_layer: u8) -> String;

    /// Track pitch after any per-layer override.
    fn pitch(&self, layer: u8) -> i64;

    fn region_reductions(&self) -> &[RegionReduction];

    fn num_layers(&self) -> usize {
        self.layers().len()
    }

    fn layer_direction(&self, layer: u8) -> LayerDirection {
        self.layers()
            .get(layer as usize)
            .map(|l| l.direction)
            .unwrap_or(LayerDirection::Unknown)
    }
}

impl TechData {
    pub fn add_layer(&mut self, name: String, direction: LayerDirection, pitch: i64, width: i64) {
        let idx = self.layers.len() as u8;
        self.layers.push(LayerData {
            name,
            index: idx,
            direction,
            pitch,
            width,
        });
    }

    pub fn add_via(&mut self, name: String, lower_layer: u8) {
        self.vias.push(ViaDef { name, lower_layer });
    }
}

impl TechnologyProvider for TechData {
    fn layers(&self) -> &[LayerData] {
        &self.layers
    }

    fn base_capacity(&self, layer: u8, direction: LayerDirection) -> Option<u32> {
        self.capacity_overrides
            .iter()
            .find(|o| o.layer == layer && o.direction == direction)
            .map(|o| o.tracks)
    }

    fn via_name(&self, lower_layer: u8) -> String {
        self.vias
            .iter()
            .find(|v| v.lower_layer == lower_layer)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| format!("VIA{}{}", lower_layer + 1, lower_layer + 2))
    }

    fn pitch(&self, layer: u8) -> i64 {
        self.adjustments
            .pitch_overrides
            .iter()
            .find(|o| o.layer == layer)
            .map(|o| o.pitch)
            .or_else(|| self.layers.get(layer as usize).map(|l| l.pitch))
            .unwrap_or(0)
    }

    fn region_reductions(&self) -> &[RegionReduction] {
        &self.adjustments.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_override_wins() {
        let mut tech = TechData::default();
        tech.add_layer("M1".into(), LayerDirection::Horizontal, 200, 100);
        tech.add_layer("M2".into(), LayerDirection::Vertical, 200, 100);
        tech.adjustments.pitch_overrides.push(PitchOverride {
            layer: 1,
            pitch: 400,
        });
        assert_eq!(tech.pitch(0), 200);
        assert_eq!(tech.pitch(1), 400);
        assert_eq!(tech.pitch(7), 0);
    }

    #[test]
    fn via_names_fall_back_to_generated() {
        let mut tech = TechData::default();
        tech.add_via("via1_fat".into(), 0);
        assert_eq!(tech.via_name(0), "via1_fat");
        assert_eq!(tech.via_name(1), "VIA23");
    }
}
