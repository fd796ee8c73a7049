use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::SetLoggerError;

/// Installs the global logger.
///
/// `level` is the default filter (`"info"`, `"debug"`, ...); `RUST_LOG`
/// overrides it when set. Each line carries an RFC 3339 local timestamp.
pub fn init(level: &str) -> Result<(), SetLoggerError> {
    Builder::from_env(Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
}
