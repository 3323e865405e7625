use crate::utils::from_env::FromEnvVar;
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

const TRACING_LOG_JSON: &str = "TRACING_LOG_JSON";

/// Filter used when `RUST_LOG` is unset or unparsable. The tool is run by
/// hand, so progress is logged at `info` by default.
const DEFAULT_DIRECTIVE: &str = "info";

/// Install a format layer based on the `TRACING_LOG_JSON` environment
/// variable, and then install the registry.
macro_rules! install_fmt {
    (json @ $registry:ident, $filter:ident) => {{
        let fmt = tracing_subscriber::fmt::layer().json().with_filter($filter);
        $registry.with(fmt).init();
    }};
    (log @ $registry:ident, $filter:ident) => {{
        let fmt = tracing_subscriber::fmt::layer().with_filter($filter);
        $registry.with(fmt).init();
    }};
    ($registry:ident, $filter:ident) => {{
        let json = bool::from_env_var(TRACING_LOG_JSON).unwrap_or(false);
        if json {
            install_fmt!(json @ $registry, $filter);
        } else {
            install_fmt!(log @ $registry, $filter);
        }
    }};
}

/// Build the level filter from `RUST_LOG`, falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Init tracing with a `fmt` layer.
///
/// ## Env Reads
///
/// - `RUST_LOG` - standard [`EnvFilter`] directives. Defaults to `info`.
/// - `TRACING_LOG_JSON` - If set to a truthy value, will enable JSON logging.
///
/// ## Panics
///
/// This function will panic if a global subscriber has already been set.
pub fn init_tracing() {
    let registry = tracing_subscriber::registry();
    let filter = env_filter();
    install_fmt!(registry, filter);
}
