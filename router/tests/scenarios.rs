use eda_common::db::core::{AccessPoint, Design, LayerDirection};
use eda_common::db::indices::NetId;
use eda_common::db::tech::{CapacityOverride, TechData};
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::util::check;
use eda_common::util::config::{ConfigError, RipupGranularity, RipupMode, RoutingConfig};
use eda_common::util::generator::{GeneratorParams, generate_random_design};
use eda_router::error::RouteError;
use eda_router::grid::{GridEdge, RoutingGrid};
use eda_router::net::NetStatus;
use eda_router::report::StopReason;
use eda_router::{route, route_design};

fn ap(x: i64, y: i64, layer: u8) -> AccessPoint {
    AccessPoint {
        pos: Point::new(x, y),
        layer,
    }
}

/// 3x3 gcells of 100 DBU on a single layer with one track per gcell edge.
fn single_layer_design() -> Design {
    let mut tech = TechData::default();
    tech.add_layer("M1".into(), LayerDirection::Unknown, 100, 50);
    for direction in [LayerDirection::Horizontal, LayerDirection::Vertical] {
        tech.capacity_overrides.push(CapacityOverride {
            layer: 0,
            direction,
            tracks: 1,
        });
    }
    Design::new(
        "three_by_three",
        Rect::new(Point::new(0, 0), Point::new(300, 300)),
        tech,
    )
}

fn single_layer_config() -> RoutingConfig {
    RoutingConfig {
        min_routing_layer: 0,
        max_routing_layer: 0,
        gcell_size: 100,
        ..RoutingConfig::default()
    }
}

fn generated(tracks: u32, nets: usize, seed: u64) -> (Design, RoutingConfig) {
    let params = GeneratorParams {
        grid_width: 24,
        grid_height: 24,
        tracks_per_gcell: tracks,
        num_nets: nets,
        seed,
        ..GeneratorParams::default()
    };
    let config = RoutingConfig {
        gcell_size: params.gcell_size,
        max_routing_layer: params.num_layers - 1,
        tile_size: 8,
        tile_halo: 3,
        ..RoutingConfig::default()
    };
    (generate_random_design(&params), config)
}

#[test]
fn two_nets_share_a_capacity_one_edge() {
    let mut design = single_layer_design();
    for name in ["a", "b"] {
        let net = design.add_net(name.to_string());
        design.add_terminal(net, "l".into(), vec![ap(50, 150, 0)]);
        design.add_terminal(net, "r".into(), vec![ap(250, 150, 0)]);
    }

    let outcome = route_design(&design, &single_layer_config()).unwrap();
    let report = &outcome.report;
    assert!(report.converged());
    assert_eq!(report.routed, 2);
    assert_eq!(report.summary.total_overflow, 0);

    let grid = outcome.controller.grid();
    let contested = GridEdge::between(GridCoord::new(0, 1, 0), GridCoord::new(1, 1, 0)).unwrap();
    assert_eq!(grid.raw_demand(contested), 1);
    // One straight connection and one detour around the middle row.
    assert_eq!(report.summary.wirelength, 2 + 4);
}

#[test]
fn congested_but_feasible_design_converges() {
    let (design, config) = generated(4, 200, 3);
    let outcome = route_design(&design, &config).unwrap();
    let report = &outcome.report;

    assert!(report.history.len() > 1, "no reroute round ran");
    assert!(report.history[0].total_overflow > 0);
    assert_eq!(report.stop_reason, StopReason::Converged);
    assert!(report.iterations <= config.overflow_iteration_budget);
    assert_eq!(report.summary.total_overflow, 0);
    assert!(report.unroutable.is_empty());
    assert!(report.accepted);
    for pair in report.history.windows(2) {
        let (prev, next) = (pair[0].total_overflow, pair[1].total_overflow);
        assert!(next < prev || next == 0, "overflow went {prev} -> {next}");
    }
    assert_eq!(report.history[report.best_iteration].total_overflow, 0);

    let routes = outcome.controller.route_map();
    assert!(check::run(&routes).is_ok());
}

#[test]
fn exhausted_edge_leaves_second_net_unroutable() {
    let mut tech = TechData::default();
    tech.add_layer("M1".into(), LayerDirection::Horizontal, 100, 50);
    let mut design = Design::new(
        "one_row",
        Rect::new(Point::new(0, 0), Point::new(300, 100)),
        tech,
    );
    for name in ["a", "b"] {
        let net = design.add_net(name.to_string());
        design.add_terminal(net, "l".into(), vec![ap(50, 50, 0)]);
        design.add_terminal(net, "r".into(), vec![ap(250, 50, 0)]);
    }
    let mut config = single_layer_config();
    config.overflow_iteration_budget = 3;

    let outcome = route_design(&design, &config).unwrap();
    let report = &outcome.report;
    assert_eq!(report.iterations, 1);
    assert!(report.converged());
    assert_eq!(report.routed, 1);
    assert_eq!(report.unroutable.len(), 1);
    assert_eq!(report.summary.total_overflow, 0);
    let edge = GridEdge::between(GridCoord::new(0, 0, 0), GridCoord::new(1, 0, 0)).unwrap();
    assert_eq!(outcome.controller.grid().raw_demand(edge), 1);

    let (lost, _) = &report.unroutable[0];
    assert_eq!(outcome.controller.net(*lost).status, NetStatus::Unresolved);
    assert!(outcome.controller.worker().net_segments(*lost).is_empty());

    // Tolerating residual overflow keeps both nets on the shared row.
    config.allow_residual_overflow = true;
    let outcome = route_design(&design, &config).unwrap();
    assert_eq!(outcome.report.routed, 2);
    assert!(outcome.report.unroutable.is_empty());
    assert_eq!(outcome.report.summary.total_overflow, 2);
    assert!(outcome.report.accepted);
}

#[test]
fn congested_design_keeps_books_balanced() {
    let (design, mut config) = generated(2, 120, 9);
    config.overflow_iteration_budget = 6;
    config.ripup_mode = RipupMode::All;
    config.ripup_granularity = RipupGranularity::Segment;
    let outcome = route_design(&design, &config).unwrap();
    let controller = &outcome.controller;

    let committed: u64 = controller
        .nets()
        .iter()
        .flat_map(|n| controller.worker().net_segments(n.id).to_vec())
        .filter_map(|id| controller.worker().segment(id))
        .map(|s| s.edges().len() as u64)
        .sum();
    assert_eq!(controller.grid().total_demand(), committed);
    assert!(outcome.report.iterations <= 6);
    assert!(check::run(&controller.route_map()).is_ok());
}

#[test]
fn trivial_and_feed_through_nets_have_no_segments() {
    let mut design = single_layer_design();
    let lonely = design.add_net("lonely".into());
    design.add_terminal(lonely, "p".into(), vec![ap(50, 50, 0)]);
    let feed = design.add_net("feed".into());
    design.add_terminal(feed, "in".into(), vec![ap(120, 120, 0)]);
    design.add_terminal(feed, "out".into(), vec![ap(180, 170, 0)]);

    let outcome = route_design(&design, &single_layer_config()).unwrap();
    let c = &outcome.controller;
    assert_eq!(c.net(lonely).status, NetStatus::Trivial);
    assert_eq!(c.net(feed).status, NetStatus::FeedThrough);
    assert!(c.worker().net_segments(lonely).is_empty());
    assert!(c.worker().net_segments(feed).is_empty());
    assert_eq!(c.grid().total_demand(), 0);
    assert_eq!(outcome.report.trivial, 1);
    assert_eq!(outcome.report.feed_through, 1);

    let routes = c.route_map();
    assert!(routes.get(lonely).is_none());
    assert!(routes.get(feed).unwrap().wires.is_empty());
    assert!(check::run(&routes).is_ok());
}

#[test]
fn rip_up_restores_capacity_and_is_idempotent() {
    let (design, config) = generated(10, 40, 5);
    let mut outcome = route_design(&design, &config).unwrap();
    let c = &mut outcome.controller;
    assert!(c.grid().total_demand() > 0);

    let routed: Vec<NetId> = c
        .nets()
        .iter()
        .filter(|n| !c.worker().net_segments(n.id).is_empty())
        .map(|n| n.id)
        .collect();
    let first = routed[0];
    let before = c.grid().total_demand();
    let used: u64 = c
        .worker()
        .net_segments(first)
        .iter()
        .filter_map(|&id| c.worker().segment(id))
        .map(|s| s.edges().len() as u64)
        .sum();
    assert!(c.rip_up_net(first) > 0);
    assert_eq!(c.rip_up_net(first), 0);
    assert_eq!(c.grid().total_demand(), before - used);
    assert_eq!(c.net(first).status, NetStatus::RippedUp);

    for &net in &routed {
        c.rip_up_net(net);
    }
    assert_eq!(c.grid().total_demand(), 0);
    assert!(c.take_dirty_nets().contains(&first));
}

#[test]
fn malformed_net_is_reported_not_fatal() {
    let mut design = single_layer_design();
    let bad = design.add_net("bad".into());
    design.add_terminal(bad, "in".into(), vec![ap(50, 50, 0)]);
    design.add_terminal(bad, "out".into(), vec![ap(-400, 50, 0)]);

    let outcome = route_design(&design, &single_layer_config()).unwrap();
    assert_eq!(outcome.report.malformed.len(), 1);
    assert_eq!(outcome.report.malformed[0].0, bad);
}

#[test]
fn configuration_errors_fail_setup() {
    let design = single_layer_design();
    let config = RoutingConfig {
        min_routing_layer: 2,
        max_routing_layer: 1,
        ..single_layer_config()
    };
    match route(&design, &design, &design.die_area, &config) {
        Err(RouteError::Config(ConfigError::InvalidLayerRange { min: 2, max: 1 })) => {}
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("invalid layer range accepted"),
    }

    let config = RoutingConfig {
        congestion_threshold: 0.0,
        ..single_layer_config()
    };
    assert!(matches!(
        route_design(&design, &config),
        Err(RouteError::Config(ConfigError::InvalidThreshold(_)))
    ));
}

#[test]
fn results_are_deterministic_across_thread_counts() {
    let (design, mut config) = generated(4, 80, 11);
    config.threads = 1;
    let single = route_design(&design, &config).unwrap();
    config.threads = 4;
    let multi = route_design(&design, &config).unwrap();

    assert_eq!(single.report.summary, multi.report.summary);
    assert_eq!(single.report.history, multi.report.history);
}
