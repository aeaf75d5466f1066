use crate::db::indices::*;
use crate::db::tech::{RegionReduction, TechData, TechnologyProvider};
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerDirection {
    Vertical,
    Horizontal,
    Unknown,
}

impl LayerDirection {
    pub fn is_horizontal(&self) -> bool {
        matches!(self, LayerDirection::Horizontal)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerData {
    pub name: String,
    pub index: u8,
    pub direction: LayerDirection,
    pub pitch: i64,
    pub width: i64,
}

/// Candidate location where a terminal can be reached by a wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessPoint {
    pub pos: Point<i64>,
    pub layer: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Terminal {
    pub name: String,
    pub access_points: Vec<AccessPoint>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetData {
    pub name: String,
    /// Position of the driving terminal within `terminals`.
    #[serde(default)]
    pub driver: usize,
    #[serde(default)]
    pub terminals: Vec<Terminal>,
}

/// Read-only view of the nets to be routed.
pub trait NetlistProvider {
    fn num_nets(&self) -> usize;
    fn net_name(&self, net: NetId) -> &str;
    fn terminals(&self, net: NetId) -> &[Terminal];
    fn driver(&self, net: NetId) -> usize;

    fn net_ids(&self) -> impl Iterator<Item = NetId> {
        (0..self.num_nets()).map(NetId::new)
    }
}

/// In-memory design: die outline, technology and netlist.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Design {
    pub name: String,
    pub die_area: Rect,
    pub tech: TechData,
    #[serde(default)]
    pub nets: Vec<NetData>,

    #[serde(skip)]
    net_name_map: HashMap<String, NetId>,
}

impl Design {
    pub fn new(name: impl Into<String>, die_area: Rect, tech: TechData) -> Self {
        Self {
            name: name.into(),
            die_area,
            tech,
            nets: Vec::with_capacity(1000),
            net_name_map: HashMap::new(),
        }
    }

    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn add_net(&mut self, name: String) -> NetId {
        if let Some(&id) = self.net_name_map.get(&name) {
            return id;
        }
        let id = NetId::new(self.nets.len());
        self.nets.push(NetData {
            name: name.clone(),
            driver: 0,
            terminals: Vec::new(),
        });
        self.net_name_map.insert(name, id);
        id
    }

    pub fn add_terminal(&mut self, net: NetId, name: String, access_points: Vec<AccessPoint>) {
        self.nets[net.index()].terminals.push(Terminal {
            name,
            access_points,
        });
    }

    pub fn set_driver(&mut self, net: NetId, terminal: usize) {
        self.nets[net.index()].driver = terminal;
    }

    pub fn net_by_name(&self, name: &str) -> Option<NetId> {
        self.net_name_map.get(name).copied()
    }

    /// Restores the name lookup after deserialisation.
    pub fn rebuild_name_map(&mut self) {
        self.net_name_map = self
            .nets
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name.clone(), NetId::new(i)))
            .collect();
    }
}

impl NetlistProvider for Design {
    fn num_nets(&self) -> usize {
        self.nets.len()
    }

    fn net_name(&self, net: NetId) -> &str {
        &self.nets[net.index()].name
    }

    fn terminals(&self, net: NetId) -> &[Terminal] {
        &self.nets[net.index()].terminals
    }

    fn driver(&self, net: NetId) -> usize {
        self.nets[net.index()].driver
    }
}

impl TechnologyProvider for Design {
    fn layers(&self) -> &[LayerData] {
        self.tech.layers()
    }

    fn base_capacity(&self, layer: u8, direction: LayerDirection) -> Option<u32> {
        self.tech.base_capacity(layer, direction)
    }

    fn via_name(&self, lower_layer: u8) -> String {
        self.tech.via_name(lower_layer)
    }

    fn pitch(&self, layer: u8) -> i64 {
        self.tech.pitch(layer)
    }

    fn region_reductions(&self) -> &[RegionReduction] {
        self.tech.region_reductions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_net_is_idempotent_by_name() {
        let mut design = Design::new(
            "top",
            Rect::new(Point::new(0, 0), Point::new(100, 100)),
            TechData::default(),
        );
        let a = design.add_net("n1".to_string());
        let b = design.add_net("n1".to_string());
        assert_eq!(a, b);
        assert_eq!(design.num_nets(), 1);

        design.add_terminal(
            a,
            "p0".to_string(),
            vec![AccessPoint {
                pos: Point::new(5, 5),
                layer: 0,
            }],
        );
        assert_eq!(NetlistProvider::terminals(&design, a).len(), 1);
    }

    #[test]
    fn name_map_survives_rebuild() {
        let mut design = Design::new("top", Rect::default(), TechData::default());
        design.add_net("clk".to_string());
        design.add_net("rst".to_string());
        design.net_name_map.clear();
        assert_eq!(design.net_by_name("rst"), None);
        design.rebuild_name_map();
        assert_eq!(design.net_by_name("rst"), Some(NetId::new(1)));
    }
}
