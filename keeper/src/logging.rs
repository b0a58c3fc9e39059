//! Logger initialisation for the binary (library code only emits through `log`)

/// Filter source, most specific first
pub const FILTER_ENV: &str = "KEEPER_LOG";

/// Install env_logger with the KEEPER_LOG / RUST_LOG filter, default `info`
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = std::env::var(FILTER_ENV)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let _ = env_logger::Builder::new()
        .parse_filters(&filter)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .try_init();
}
