use std::fs::OpenOptions;
use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env, Target};

use crate::config::LoggingConfig;

/// `2024-05-01T12:00:00 WARN  [enasolar2mqtt::fetcher] message`, to the
/// configured file. `RUST_LOG` takes precedence over the configured level.
pub fn init_logger(config: &LoggingConfig) {
    let mut builder = Builder::from_env(Env::default().default_filter_or(&config.level));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} [{}] {}",
            Local::now().format("%Y-%m-%dT%H:%M:%S"),
            record.level(),
            record.module_path().unwrap_or_else(|| record.target()),
            record.args()
        )
    });

    let mut file_error = None;
    if let Some(path) = &config.file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => file_error = Some((path, e)),
        }
    }
    builder.init();

    if let Some((path, e)) = file_error {
        log::warn!("Cannot open log file {path}: {e}, logging to stderr");
    }
}
