use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber.
///
/// Default level is `info`; `--debug` raises it to `debug`. The
/// `AVIS_MIRROR_LOG` environment variable takes precedence over both when set.
pub fn init(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = env::var("AVIS_MIRROR_LOG").unwrap_or_else(|_| default_filter.to_string());
    let filter_layer = EnvFilter::new(filter);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_file(false)
                .with_target(false),
        )
        .with(filter_layer)
        .init();
}
