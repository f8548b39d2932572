use std::{env, sync::Once};

use tracing_subscriber::EnvFilter;

static LOG_INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info";

/// Install the global `tracing` subscriber.
///
/// Output is JSON if `RUST_LOG_FORMAT=json` and colour is disabled by a
/// non-empty `NO_COLOR`. Subsequent calls do nothing, so tests may call it
/// freely.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        if env::var("RUST_LOG_FORMAT") == Ok("json".to_string()) {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .json()
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(use_color())
                .try_init();
        }
    });
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn use_color() -> bool {
    env::var("NO_COLOR").map(|v| v.is_empty()).unwrap_or(true)
}
