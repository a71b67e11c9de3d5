//! Capture-file replay source.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::parser::parse_samples;
use crate::sample::Sample;
use crate::source::{Source, SourceError};

/// Replays a recorded status capture (and optionally a variables capture)
/// through the parser.
///
/// Samples come out as fast as they parse, with no pacing; the configured
/// interval only drives the merger's windowing. The feed closes at end of
/// file.
pub struct FileSource {
    interval: Duration,
    status_path: PathBuf,
    variables_path: Option<PathBuf>,
}

impl FileSource {
    pub fn new(
        interval: Duration,
        status_path: impl Into<PathBuf>,
        variables_path: Option<PathBuf>,
    ) -> Self {
        Self {
            interval,
            status_path: status_path.into(),
            variables_path,
        }
    }

    fn harvest(path: &Path) -> Result<Receiver<Sample>, SourceError> {
        let file = File::open(path)?;
        debug!("replaying capture {}", path.display());

        let (tx, rx) = mpsc::sync_channel(0);
        thread::spawn(move || parse_samples(BufReader::new(file), tx));
        Ok(rx)
    }
}

impl Source for FileSource {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn status(&mut self) -> Result<Receiver<Sample>, SourceError> {
        Self::harvest(&self.status_path)
    }

    fn variables(&mut self) -> Result<Option<Receiver<Sample>>, SourceError> {
        match &self.variables_path {
            Some(path) => Self::harvest(path).map(Some),
            None => Ok(None),
        }
    }
}
