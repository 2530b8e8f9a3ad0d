//! Tracing initialisation for cairn binaries.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events the default filter admits at the requested level.
const CAIRN_TARGETS: &[&str] = &[
    "cairn",
    "cairn_core",
    "cairn_domains",
    "cairn_providers",
    "cairn_oscal",
];

/// Default filter: cairn crates at `level`, dependencies at `warn`.
pub fn default_filter(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        CAIRN_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str().to_ascii_lowercase())),
    );
    directives.join(",")
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level` when set. `json` switches to
/// newline-delimited JSON lines. Logs go to stderr. Only the first call in a process takes
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(fmt::layer().with_target(false).json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    result.ok();
}
