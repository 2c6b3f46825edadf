use tracing::debug;
use tracing_subscriber::{prelude::*, fmt, EnvFilter};

// Install the global subscriber, RUST_LOG takes precedence
// over the build dependent default level
pub fn init_logging() {
    let level = if cfg!(debug_assertions) { "trace" } else { "info" };

    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(f) => (f, true),
        Err(_) => (EnvFilter::new(level), false),
    };

    let fmt_layer = fmt::layer();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    if !from_env {
        debug!("\"RUST_LOG\" variable not set, defaulting to {level}");
    }
}
