use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `RUST_LOG` takes precedence when
/// set; otherwise `fallback` names the maximum level, with unparseable
/// values degrading to `info`.
pub fn init(fallback: &str) {
    let level = fallback.parse::<Level>().unwrap_or(Level::INFO);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    // try_init so tests and embedding libraries can call this repeatedly
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
