pub mod logging;

/// Initialize env_logger for hosts that have no logger of their own.
/// Reads `RUST_LOG`, defaulting to info.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
