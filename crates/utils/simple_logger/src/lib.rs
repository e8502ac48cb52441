#![cfg_attr(not(test), no_std)]

use core::fmt;

use log::{self, Level, LevelFilter, Log, Metadata, Record};
use klocks::Once;

/// 控制台输出。内核里是串口，测试里是 stderr
pub type ConsoleWrite = fn(fmt::Arguments<'_>);

/// a simple logger
struct SimpleLogger {
    clog: LevelFilter,
    console: ConsoleWrite,
}

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.clog
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31, // Red
            Level::Warn => 93,  // BrightYellow
            Level::Info => 34,  // Blue
            Level::Debug => 32, // Green
            Level::Trace => 90, // BrightBlack
        };
        (self.console)(format_args!(
            "\u{1B}[{}m[{:>5}] {}\u{1B}[0m\n",
            color,
            record.level(),
            record.args(),
        ));
    }

    fn flush(&self) {}
}

static LOGGER: Once<SimpleLogger> = Once::new();

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level {
        Some("ERROR") => LevelFilter::Error,
        Some("WARN") => LevelFilter::Warn,
        Some("INFO") => LevelFilter::Info,
        Some("DEBUG") => LevelFilter::Debug,
        Some("TRACE") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// initiate logger，日志级别由编译期的 `KERNEL_CLOG` 决定
pub fn init(console: ConsoleWrite) {
    init_with_level(console, parse_level(option_env!("KERNEL_CLOG")));
}

/// 以指定级别初始化。只有第一次调用生效
pub fn init_with_level(console: ConsoleWrite, clog: LevelFilter) {
    let mut first = false;
    let logger = LOGGER.call_once(|| {
        first = true;
        SimpleLogger { clog, console }
    });
    if first && log::set_logger(logger).is_ok() {
        log::set_max_level(logger.clog);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_names() {
        assert_eq!(parse_level(Some("TRACE")), LevelFilter::Trace);
        assert_eq!(parse_level(Some("WARN")), LevelFilter::Warn);
        assert_eq!(parse_level(Some("verbose")), LevelFilter::Off);
        assert_eq!(parse_level(None), LevelFilter::Off);
    }

    #[test]
    fn only_first_init_wins() {
        fn sink(args: fmt::Arguments<'_>) {
            eprint!("{args}");
        }
        init_with_level(sink, LevelFilter::Debug);
        init_with_level(sink, LevelFilter::Error);
        assert_eq!(log::max_level(), LevelFilter::Debug);
        log::debug!("logger installed");
    }
}
