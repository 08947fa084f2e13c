/// Crash-safe file writes (temp file, fsync, rename).
pub mod atomic_file;
/// Tracing subscriber initialization.
pub mod logging;
/// TOML configuration with environment overrides and hot reload.
pub mod toml_config;
