//! Logging setup for binaries built on this crate.

use env_logger::Builder;
use std::io::Write;

/// Initialize logging, at `level` by default.
///
/// Setting the env var RUST_LOG overrides `level`.
///
/// Output format can be made systemd-friendly by setting
/// RUST_LOG_FORMAT to SYSTEMD.
pub fn init_with_level(level: log::LevelFilter) {
    let mut builder = Builder::new();

    if let Ok(format) = std::env::var("RUST_LOG_FORMAT") {
        if format == "SYSTEMD" {
            enable_systemd_log_format(&mut builder);
        }
    }

    builder.filter_level(level);
    builder.parse_default_env();
    // Ignore failures: logging may already have been set up.
    let _ = builder.try_init();
}

/// Set the format of the log output to a systemd-compatible one.
///
/// Time isn't included since it's tracked by the logging facility
/// anyways.
fn enable_systemd_log_format(builder: &mut Builder) {
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "<{}>{}: {}",
            // Map to syslog priority level (RFC 5424)
            match record.level() {
                log::Level::Error => 3,
                log::Level::Warn => 4,
                log::Level::Info => 5,
                log::Level::Debug => 7,
                log::Level::Trace => 7,
            },
            record.target(),
            record.args()
        )
    });
}
