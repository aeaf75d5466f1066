use crate::db::indices::NetId;
use crate::db::route::{NetRoute, RouteMap};
use crate::geom::point::Point;
use crate::geom::rect::Rect;
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::VecDeque;

/// Verifies that every routed net connects all of its pin anchors.
pub fn run(routes: &RouteMap) -> Result<(), String> {
    log::info!("Starting Route Verification (opens) on {} nets", routes.len());

    let failures: DashMap<NetId, String> = DashMap::new();
    routes.nets.par_iter().for_each(|(&net, route)| {
        if let Err(e) = check_net(route) {
            failures.insert(net, e);
        }
    });

    if failures.is_empty() {
        log::info!("\x1b[32mPASS\x1b[0m: All nets are fully connected.");
        return Ok(());
    }

    let mut msgs: Vec<(NetId, String)> = failures.into_iter().collect();
    msgs.sort_by_key(|(net, _)| *net);
    for (_, msg) in msgs.iter().take(10) {
        log::error!("{}", msg);
    }
    log::error!(
        "\x1b[31mFAIL\x1b[0m: {} open net(s) detected",
        msgs.len()
    );
    Err(msgs
        .into_iter()
        .map(|(_, m)| m)
        .collect::<Vec<_>>()
        .join("; "))
}

#[derive(Clone, Copy, Debug)]
struct Element {
    rect: Rect,
    lo_layer: u8,
    hi_layer: u8,
}

impl Element {
    fn touches(&self, other: &Element) -> bool {
        self.lo_layer <= other.hi_layer
            && other.lo_layer <= self.hi_layer
            && self.rect.intersects(&other.rect)
    }

    fn covers(&self, p: Point<i64>, layer: u8) -> bool {
        layer >= self.lo_layer && layer <= self.hi_layer && self.rect.contains(p)
    }
}

fn check_net(route: &NetRoute) -> Result<(), String> {
    let first = match route.anchors.first() {
        Some(a) => *a,
        None => return Ok(()),
    };
    if route.anchors.iter().all(|a| *a == first) {
        return Ok(());
    }

    let mut elements: Vec<Element> = route
        .wires
        .iter()
        .map(|w| Element {
            rect: w.bbox(),
            lo_layer: w.start_layer.min(w.end_layer),
            hi_layer: w.start_layer.max(w.end_layer),
        })
        .collect();
    elements.extend(route.vias.iter().map(|v| Element {
        rect: Rect::from_point(Point::new(v.x, v.y)),
        lo_layer: v.lower_layer,
        hi_layer: v.lower_layer + 1,
    }));

    if elements.is_empty() {
        return Err(format!("Net '{}': Unrouted (No segments)", route.name));
    }

    let n = elements.len();
    let mut adj = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            if elements[i].touches(&elements[j]) {
                adj[i].push(j);
                adj[j].push(i);
            }
        }
    }

    let mut anchor_elements = Vec::with_capacity(route.anchors.len());
    for (idx, a) in route.anchors.iter().enumerate() {
        let p = Point::new(a.x, a.y);
        match elements.iter().position(|e| e.covers(p, a.layer)) {
            Some(e) => anchor_elements.push(e),
            None => {
                return Err(format!(
                    "Net '{}': Pin {} at ({},{}) on layer {} not connected to any wire.",
                    route.name, idx, a.x, a.y, a.layer
                ));
            }
        }
    }

    let mut visited = vec![false; n];
    let mut queue = VecDeque::new();
    visited[anchor_elements[0]] = true;
    queue.push_back(anchor_elements[0]);
    while let Some(u) = queue.pop_front() {
        for &v in &adj[u] {
            if !visited[v] {
                visited[v] = true;
                queue.push_back(v);
            }
        }
    }

    if anchor_elements.iter().all(|&e| visited[e]) {
        Ok(())
    } else {
        Err(format!("Net '{}': Broken connectivity (Split net).", route.name))
    }
}
