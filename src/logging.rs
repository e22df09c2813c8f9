use crate::error::{AppError, Result};
use log::{LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct SimpleLogger {
    log_file: PathBuf,
    level: LevelFilter,
}

static LOGGER: OnceCell<SimpleLogger> = OnceCell::new();

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_entry = format!(
                "{} {} - {}\n",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.args()
            );
            if let Ok(mut file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
            {
                let _ = file.write_all(log_entry.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

/// Append log lines to `<dir>/log.txt`. Debug level when `debug` is set.
pub fn init(dir: &Path, debug: bool) -> Result<()> {
    create_dir_all(dir)?;
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    LOGGER
        .set(SimpleLogger {
            log_file: dir.join("log.txt"),
            level,
        })
        .map_err(|_| AppError::Logger("logger already initialized".to_string()))?;
    let logger = LOGGER
        .get()
        .ok_or_else(|| AppError::Logger("logger missing after init".to_string()))?;

    log::set_logger(logger).map_err(|e| AppError::Logger(e.to_string()))?;
    log::set_max_level(level);
    Ok(())
}
