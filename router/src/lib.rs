pub mod algo;
pub mod congestion;
pub mod error;
pub mod grid;
pub mod net;
pub mod region_query;
pub mod report;
pub mod topology;
pub mod utils;
pub mod worker;

use congestion::CongestionController;
use eda_common::db::core::{Design, NetlistProvider};
use eda_common::db::tech::TechnologyProvider;
use eda_common::geom::rect::Rect;
use eda_common::util::config::RoutingConfig;
use error::RouteError;
use report::RouteReport;

/// Finished run: the report plus the controller holding the committed
/// routes, for route-map extraction or further incremental reroutes.
pub struct RouteOutcome {
    pub report: RouteReport,
    pub controller: CongestionController,
}

pub fn route<N, T>(
    netlist: &N,
    tech: &T,
    die_area: &Rect,
    config: &RoutingConfig,
) -> Result<RouteOutcome, RouteError>
where
    N: NetlistProvider + Sync + ?Sized,
    T: TechnologyProvider + Sync + ?Sized,
{
    let run = || -> Result<RouteOutcome, RouteError> {
        let mut controller = CongestionController::new(netlist, tech, die_area, config)?;
        let report = controller.run();
        report.log();
        Ok(RouteOutcome { report, controller })
    };

    if config.threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()?;
        pool.install(run)
    } else {
        run()
    }
}

pub fn route_design(design: &Design, config: &RoutingConfig) -> Result<RouteOutcome, RouteError> {
    route(design, design, &design.die_area, config)
}
