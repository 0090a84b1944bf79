//! Tracing initialization.
//!
//! `LOG_LEVEL` picks the default filter (RUST_LOG wins when set) and
//! `LOG_FORMAT=json` switches to structured JSON output for log shippers.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let default_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
