//! Global tracing subscriber setup.

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

/// Build the level filter. `RUST_LOG` wins over `level` when set and valid.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global stderr subscriber, compact or JSON lines.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_subscriber(level: &str, json: bool) -> bool {
    let filter = env_filter(level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.compact().try_init().is_ok()
    }
}

/// Run `f` under a scoped stderr subscriber at `info` (or `RUST_LOG`).
///
/// Covers work that logs before settings can configure the global
/// subscriber, such as rejected `EMPORIUM_*` overrides.
pub fn with_bootstrap<T>(json: bool, f: impl FnOnce() -> T) -> T {
    tracing::dispatcher::with_default(&bootstrap_dispatch(json, std::io::stderr), f)
}

fn bootstrap_dispatch<W>(json: bool, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_target(true)
        .with_writer(writer);
    if json {
        Dispatch::new(builder.json().finish())
    } else {
        Dispatch::new(builder.compact().finish())
    }
}
