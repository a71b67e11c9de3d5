//! Live source driving a spawned `mysql` client.

use std::io::{BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::parser::parse_samples;
use crate::sample::Sample;
use crate::source::{
    MYSQL_CLI, MYSQL_CLI_ARGS, STATUS_COMMAND, VARIABLES_COMMAND, Source, SourceError,
    advance_deadline, end_command,
};

/// Spawns the `mysql` cli as a child process and feeds it a status or
/// variables statement once per interval, parsing the framed output it
/// streams back.
///
/// Each feed gets its own child. The child is line-oriented and trusted
/// for exactly one continuous run: if it exits unsuccessfully at any point
/// the whole process terminates, because counters from a restarted client
/// cannot be reconciled with earlier ticks. On Linux the child also gets a
/// parent-death signal so it cannot outlive us.
pub struct LiveSource {
    interval: Duration,
    client: String,
    base_args: Vec<String>,
    extra_args: Vec<String>,
}

impl LiveSource {
    /// Creates a live source; `extra_args` are passed to the client after
    /// the fixed batch flags (connection options like `-u`, `-h`, `-P`).
    pub fn new(interval: Duration, extra_args: Vec<String>) -> Self {
        Self {
            interval,
            client: MYSQL_CLI.to_string(),
            base_args: MYSQL_CLI_ARGS.iter().map(|a| a.to_string()).collect(),
            extra_args,
        }
    }

    /// Substitutes the client command wholesale, for exercising the
    /// subprocess plumbing without a real server.
    #[cfg(test)]
    fn with_command(interval: Duration, client: &str, args: Vec<String>) -> Self {
        Self {
            interval,
            client: client.to_string(),
            base_args: Vec::new(),
            extra_args: args,
        }
    }

    fn harvest(&self, statement: &str) -> Result<Receiver<Sample>, SourceError> {
        let mut cmd = Command::new(&self.client);
        cmd.args(&self.base_args)
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // The child must not outlive us: have the kernel deliver SIGTERM
        // to it when the parent goes away.
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);
                    Ok(())
                });
            }
        }

        let client = self.client.clone();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::ClientNotFound(client.clone())
            } else {
                SourceError::Io(e)
            }
        })?;
        debug!("spawned {} (pid {})", client, child.id());

        let mut stdin = child.stdin.take().expect("stdin is piped");
        let stdout = child.stdout.take().expect("stdout is piped");
        let mut stderr = child.stderr.take().expect("stderr is piped");

        // Reap the child and capture its stderr. An unsuccessful exit is
        // fatal for the run, not just for this feed.
        thread::spawn(move || {
            let mut captured = String::new();
            let _ = stderr.read_to_string(&mut captured);
            match child.wait() {
                Ok(status) if !status.success() => {
                    error!("{} exited: {}", client, status);
                    if !captured.is_empty() {
                        eprint!("{}", captured);
                    }
                    std::process::exit(1);
                }
                Ok(_) => debug!("{} exited cleanly", client),
                Err(e) => error!("failed to reap {}: {}", client, e),
            }
        });

        // Ask for a fresh record immediately and then once per interval.
        // This timer runs on its own schedule regardless of how fast the
        // consumer drains the output side.
        let command = format!("{}; {}\n", statement, end_command());
        let interval = self.interval;
        thread::spawn(move || {
            // Fixed-rate ticks, independent of how fast anyone reads the
            // output side.
            let mut deadline = Instant::now();
            loop {
                // A write failure means the child is gone; the reaper
                // thread decides whether that is fatal.
                if stdin.write_all(command.as_bytes()).is_err() {
                    break;
                }
                let (next, sleep) = advance_deadline(deadline, Instant::now(), interval);
                deadline = next;
                thread::sleep(sleep);
            }
        });

        let (tx, rx) = mpsc::sync_channel(0);
        thread::spawn(move || parse_samples(BufReader::new(stdout), tx));
        Ok(rx)
    }
}

impl Source for LiveSource {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn status(&mut self) -> Result<Receiver<Sample>, SourceError> {
        self.harvest(STATUS_COMMAND)
    }

    fn variables(&mut self) -> Result<Option<Receiver<Sample>>, SourceError> {
        self.harvest(VARIABLES_COMMAND).map(Some)
    }
}
