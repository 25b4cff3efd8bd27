use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::fmt;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

use crate::config::{LogFormat, Logging};

fn get_rust_log(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "",
        LevelFilter::ERROR => "ERROR",
        LevelFilter::WARN => "WARN",
        LevelFilter::INFO => "INFO",
        LevelFilter::DEBUG => {
            "INFO,\
             readcache=DEBUG,\
             readcache_stress=DEBUG"
        }
        LevelFilter::TRACE => {
            "INFO,\
             readcache=TRACE,\
             readcache_stress=TRACE"
        }
    }
}

/// Initializes logging for the stresstest.
///
/// This considers the `RUST_LOG` environment variable and defaults it to the level specified in the
/// configuration.
pub fn init_logging(config: &Logging) {
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| get_rust_log(config.level).to_string());

    if config.format == LogFormat::Json {
        fmt()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true)
            .with_env_filter(rust_log.as_str())
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .init();
        return;
    }

    let fmt_layer = {
        let layer = tracing_subscriber::fmt::layer()
            .with_timer(UtcTime::rfc_3339())
            .with_target(true);

        match (config.format, console::user_attended()) {
            (LogFormat::Auto, true) | (LogFormat::Pretty, _) => layer.pretty().boxed(),
            _ => layer.compact().with_ansi(false).boxed(),
        }
    }
    .with_filter(EnvFilter::new(&rust_log));

    tracing_subscriber::registry().with(fmt_layer).init();
}
