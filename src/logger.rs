use log::{Level, LevelFilter};

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let tag = match record.level() {
            Level::Error => "Error",
            Level::Warn => "Warn",
            Level::Info => "Info",
            Level::Debug => "Debug",
            Level::Trace => "Trace",
        };

        // Stdout is reserved for scan results.
        eprintln!("[{}] {}", tag, record.args());
    }

    fn flush(&self) {}
}

/// Installs the console logger. Warnings are always shown, `debug` adds
/// per-probe diagnostics.
pub fn init(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    // Result is ignored since a second call only means a logger is already set.
    let _ = log::set_logger(&LOGGER).map(|_| log::set_max_level(level));
}
