use crate::qemu_trace;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` sink for the QEMU debug console.
pub struct QemuLogger {
    max_level: AtomicUsize,
}

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Off);

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level: AtomicUsize::new(max_level as usize),
        }
    }

    /// Install the global logger. Call this once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed before.
    pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
        LOGGER.set_max_level(max_level);
        log::set_logger(&LOGGER)?;
        log::set_max_level(max_level);
        Ok(())
    }

    pub fn set_max_level(&self, max_level: LevelFilter) {
        self.max_level.store(max_level as usize, Ordering::Relaxed);
    }
}

/// Render a record as `[LEVEL] target: message`.
pub(crate) fn write_record(w: &mut impl fmt::Write, record: &Record) -> fmt::Result {
    writeln!(w, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as usize <= self.max_level.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        struct Trace;
        impl fmt::Write for Trace {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                qemu_trace!("{s}");
                Ok(())
            }
        }

        let _ = write_record(&mut Trace, record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn records_are_rendered_with_level_and_target() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Error)
                .target("kernel_alloc::heap")
                .args(format_args!("heap exhausted: {} bytes", 64))
                .build(),
        )
        .unwrap();
        assert_eq!(out, "[ERROR] kernel_alloc::heap: heap exhausted: 64 bytes\n");
    }

    #[test]
    fn level_filter_applies() {
        let logger = QemuLogger::new(LevelFilter::Warn);
        let warn = Metadata::builder().level(Level::Warn).build();
        let info = Metadata::builder().level(Level::Info).build();
        assert!(logger.enabled(&warn));
        assert!(!logger.enabled(&info));

        logger.set_max_level(LevelFilter::Trace);
        assert!(logger.enabled(&info));
    }
}
