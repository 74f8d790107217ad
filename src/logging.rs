//! Stderr backend for the [`log`] facade.
//!
//! All stack output funnels through one backend so log lines from the
//! interrupt thread and application threads do not interleave mid-line
//! (`eprintln!` locks stderr per call).  The maximum level is set at
//! init time and can be raised for debugging without touching call
//! sites.

use log::{Level, LevelFilter, Metadata, Record};

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "E",
            Level::Warn => "W",
            Level::Info => "I",
            Level::Debug => "D",
            Level::Trace => "T",
        };
        eprintln!("[{}] {}: {}", tag, record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// Install the stderr backend with the given maximum level.
///
/// Returns an error if another logger is already installed (tests and
/// embedding applications may bring their own).
pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Format `data` as a classic offset + hex + ASCII dump into a string.
///
/// Used behind `trace!` on the frame paths; callers should gate on
/// [`log::log_enabled!`] to avoid formatting cost when tracing is off.
pub fn hexdump(data: &[u8]) -> String {
    use std::fmt::Write as _;

    let mut out = String::with_capacity(data.len() * 4);
    for (offset, row) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}: ", offset * 16);
        for i in 0..16 {
            match row.get(i) {
                Some(b) => {
                    let _ = write!(out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str(" |");
        for b in row {
            let c = if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            };
            out.push(c);
        }
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexdump_layout() {
        let dump = hexdump(b"abcdefghijklmnopq");
        let mut lines = dump.lines();
        let first = lines.next().unwrap();
        assert!(first.starts_with("0000: 61 62 63 64"));
        assert!(first.ends_with("|abcdefghijklmnop|"));
        let second = lines.next().unwrap();
        assert!(second.starts_with("0010: 71"));
        assert!(second.ends_with("|q|"));
    }
}
