//! Sample sources: where status and variables feeds come from.
//!
//! Exactly one source is active per run, picked at startup: replaying a
//! capture file ([`FileSource`]), driving a spawned `mysql` client
//! ([`LiveSource`]), or polling a server directly ([`SqlSource`]).

mod file;
mod live;
mod sql;

pub use file::FileSource;
pub use live::LiveSource;
pub use sql::SqlSource;

use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use crate::sample::Sample;

/// The line-oriented client a [`LiveSource`] spawns.
pub const MYSQL_CLI: &str = "mysql";

/// Flags the client is always started with: batch (tab-separated) output,
/// unbuffered, no column headers.
pub const MYSQL_CLI_ARGS: [&str; 3] = ["-B", "-n", "-N"];

/// Record-framing sentinel. This one constant is both the marker the
/// parser looks for and the string [`end_command`] makes the server echo;
/// the two usages must never drift apart.
pub const END_STRING: &str = "MYQTOOLSEND";

/// Statement sent to produce a status record.
pub const STATUS_COMMAND: &str = "SHOW GLOBAL STATUS";

/// Statement sent to produce a variables record.
pub const VARIABLES_COMMAND: &str = "SHOW GLOBAL VARIABLES";

/// Prefix under which variables keys are merged into a status sample.
pub const VAR_PREFIX: &str = "V_";

/// The statement that makes the server echo the framing sentinel.
pub fn end_command() -> String {
    format!("SELECT '{}'", END_STRING)
}

/// Advances a periodic deadline by one interval, returning the new
/// deadline and how long to sleep for it.
///
/// The deadline is fixed-rate, so time spent querying or waiting on the
/// consumer does not stretch the period. A deadline that has already
/// passed resets to `now` instead of bursting to catch up.
pub(crate) fn advance_deadline(
    deadline: Instant,
    now: Instant,
    interval: Duration,
) -> (Instant, Duration) {
    let next = deadline + interval;
    if next > now {
        (next, next - now)
    } else {
        (now, Duration::ZERO)
    }
}

/// Error type for source startup failures.
///
/// Anything that goes wrong after a feed has started flows through the
/// feed itself (channel closure, or an error carried inside a sample).
#[derive(Debug)]
pub enum SourceError {
    /// An I/O failure opening a capture file or wiring up the client.
    Io(std::io::Error),
    /// The external client binary could not be found.
    ClientNotFound(String),
    /// The database endpoint could not be reached.
    Connection(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "i/o error: {}", e),
            SourceError::ClientNotFound(name) => {
                write!(f, "client '{}' not found in PATH", name)
            }
            SourceError::Connection(msg) => write!(f, "connection failed: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// A producer of status (and optionally variables) sample feeds.
///
/// Starting a feed returns the receiving end of a rendezvous channel; the
/// producer runs on its own thread and stalls until the consumer takes
/// each sample, so backpressure reaches all the way back to the source.
pub trait Source {
    /// Configured sampling period.
    fn interval(&self) -> Duration;

    /// Starts the status feed. Failure here is fatal for the run.
    fn status(&mut self) -> Result<Receiver<Sample>, SourceError>;

    /// Starts the variables feed. `Ok(None)` means the source has no
    /// variables to offer (no capture file configured, say), which is a
    /// valid, non-fatal absence; `Err` is a startup failure.
    fn variables(&mut self) -> Result<Option<Receiver<Sample>>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_command_echoes_the_framing_sentinel() {
        // The parser's record framing depends on the command and the
        // sentinel staying one symbol.
        assert!(end_command().contains(END_STRING));
    }

    #[test]
    fn deadline_advances_at_a_fixed_rate() {
        let interval = Duration::from_secs(5);
        let start = Instant::now();

        // One second of work still leaves a four second sleep: the tick
        // period stays `interval`, not work + interval.
        let busy = start + Duration::from_secs(1);
        let (next, sleep) = advance_deadline(start, busy, interval);
        assert_eq!(next, start + interval);
        assert_eq!(sleep, Duration::from_secs(4));
    }

    #[test]
    fn overrun_deadline_resets_instead_of_bursting() {
        let interval = Duration::from_secs(5);
        let start = Instant::now();

        let late = start + Duration::from_secs(12);
        let (next, sleep) = advance_deadline(start, late, interval);
        assert_eq!(next, late);
        assert_eq!(sleep, Duration::ZERO);
    }
}
