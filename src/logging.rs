//! Injectable log sink.
//!
//! Library code only uses the `log` macros. Hosts that do not run a logger of
//! their own can route this crate's records to a callback with [`set_log_sink`].

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use parking_lot::{Mutex, RwLock};

/// Target prefix of every record this crate emits
pub const LOG_TARGET: &str = "animated_image";

type Sink = Box<dyn Fn(&str, Level) + Send + Sync>;

struct SinkLogger {
    sink: RwLock<Option<(Sink, LevelFilter)>>,
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        if !metadata.target().starts_with(LOG_TARGET) {
            return false;
        }
        matches!(&*self.sink.read(), Some((_, filter)) if metadata.level() <= *filter)
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some((sink, _)) = &*self.sink.read() {
            sink(&record.args().to_string(), record.level());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SinkLogger = SinkLogger {
    sink: RwLock::new(None),
};

static INSTALLED: Mutex<bool> = Mutex::new(false);

/// Route this crate's records at or above `level` to `sink`.
///
/// Installs the process-wide `log` logger on first use and fails if another
/// logger (for example `env_logger`) is already installed. Calling it again
/// replaces the sink.
pub fn set_log_sink<F>(sink: F, level: LevelFilter) -> Result<(), SetLoggerError>
where
    F: Fn(&str, Level) + Send + Sync + 'static,
{
    let mut installed = INSTALLED.lock();
    if !*installed {
        log::set_logger(&LOGGER)?;
        *installed = true;
    }

    *LOGGER.sink.write() = Some((Box::new(sink), level));
    if level > log::max_level() {
        log::set_max_level(level);
    }
    Ok(())
}

/// Remove the sink; records are dropped until a new one is set.
pub fn clear_log_sink() {
    LOGGER.sink.write().take();
}
