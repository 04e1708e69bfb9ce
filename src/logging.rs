//! Logging setup shared by the binaries.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Installs a compact stderr subscriber filtered by `RUST_LOG`.
///
/// `LOG_FILE=1` and `LOG_LINE_NUM=1` add source locations to each line.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init(whoami: &str) {
    let filt = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_file = std::env::var("LOG_FILE").is_ok_and(|v| v == "1");
    let log_line_num = std::env::var("LOG_LINE_NUM").is_ok_and(|v| v == "1");

    let stderr_sub = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_file(log_file)
        .with_line_number(log_line_num)
        .with_filter(filt);

    // A second init (e.g. from tests) keeps the first subscriber.
    if tracing_subscriber::registry().with(stderr_sub).try_init().is_ok() {
        info!(%whoami, "logging started");
    }
}
