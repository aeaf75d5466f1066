use eda_common::geom::rect::Rect;
use eda_common::util::config::ConfigError;
use thiserror::Error;

/// Setup failures. Problems with individual nets are reported in
/// [`crate::report::RouteReport`] instead.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("technology defines no routing layers")]
    NoLayers,
    #[error("die area {0:?} is empty")]
    EmptyDie(Rect),
    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
