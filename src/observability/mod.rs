//! 可观测性：tracing 日志

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 info（`verbose` 时 debug），RUST_LOG 优先
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}
