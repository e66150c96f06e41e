//! Centralized timestamped logging.
//!
//! Every framecast log line goes through `logi!`, `logw!`, or `loge!` and is
//! shaped like:
//!     <timestamp> [TAG][thread] message
//!
//! Child-process output (the FFmpeg writer) is piped through the same format
//! via [`spawn_pipe_thread`] so everything stays tagged and timestamped.

use std::io::{BufRead, BufReader, Read};

// The `time` crate is used purely for millisecond-precision timestamps.
// Local time when available, UTC otherwise.
pub(crate) fn log_timestamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    let fmt = time::format_description::parse(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]",
    )
    .expect("valid time format description");
    now.format(&fmt).unwrap_or_else(|_| "<time-format-error>".to_string())
}

pub(crate) fn log_thread_name() -> String {
    std::thread::current().name().unwrap_or("thread").to_string()
}

/// Write one formatted line. Info goes to stdout, warnings and errors to
/// stderr. Visible so the macros can reach it from anywhere in the crate.
pub fn log_line(level: &str, tag: &str, msg: &str) {
    let line = format!("{} [{}][{}] {}", log_timestamp(), tag, log_thread_name(), msg);
    if level == "INFO" {
        println!("{line}");
    } else {
        eprintln!("{line}");
    }
}

/// Pipe a `Read` stream (child stdout/stderr) into the logger on its own thread.
pub fn spawn_pipe_thread<R: Read + Send + 'static>(
    thread_name: &str,
    tag: &str,
    reader: R,
    as_warn: bool,
) {
    let tag = tag.to_string();
    let _ = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let br = BufReader::new(reader);
            for line in br.lines().map_while(Result::ok) {
                log_line(if as_warn { "WARN" } else { "INFO" }, &tag, &line);
            }
        });
}

/// Info log.
#[macro_export]
macro_rules! logi {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line("INFO", $tag, &format!($($arg)*));
    }};
}

/// Warning log.
#[macro_export]
macro_rules! logw {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line("WARN", $tag, &format!($($arg)*));
    }};
}

/// Error log.
#[macro_export]
macro_rules! loge {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line("ERROR", $tag, &format!($($arg)*));
    }};
}
