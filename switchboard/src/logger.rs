//! Logger initialization for the server binary.

use std::{io::IsTerminal, str::FromStr, sync::Once};

use jiff::Timestamp;
use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};

static INIT: Once = Once::new();

/// Stderr line layout: RFC 3339 UTC timestamp with millisecond precision, a
/// left-aligned level column, then the message. The level column is colored
/// only when stderr is a terminal.
#[derive(Debug)]
struct StderrLayout {
    color: bool,
}

impl Layout for StderrLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let timestamp = Timestamp::now();
        let level = record.level();

        let line = if self.color {
            format!(
                "{timestamp:.3} \x1b[{}m{level:<5}\x1b[0m {}",
                level_color(level),
                record.args()
            )
        } else {
            format!("{timestamp:.3} {level:<5} {}", record.args())
        };

        Ok(line.into_bytes())
    }
}

/// Bright ANSI color code for a level.
fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "91",
        log::Level::Warn => "93",
        log::Level::Info => "92",
        log::Level::Debug => "94",
        log::Level::Trace => "90",
    }
}

/// Initialize the logger. The filter is a string like "info" or
/// "gateway=debug".
pub fn init(log_filter: &str) {
    let filter = log_filter.to_owned();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |dispatch| {
                let filter = EnvFilter::from_str(&filter)
                    .unwrap_or_else(|_| EnvFilter::from_str("info").expect("static filter is valid"));

                let layout = StderrLayout {
                    color: std::io::stderr().is_terminal(),
                };

                dispatch.filter(filter).append(Stderr::default().with_layout(layout))
            })
            .apply();
    });
}
