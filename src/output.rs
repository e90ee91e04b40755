use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    DataPointsResult, DatasetResult, DatasetsResult, ProgressEvent, ProgressSink, RefreshReport,
};
use crate::search::SearchResult;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_dataset(result: &DatasetResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_datasets(result: &DatasetsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_datapoints(result: &DataPointsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_refresh(result: &RefreshReport) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Phase lines on stderr, so stdout stays valid JSON.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({} ms)\n", event.message, elapsed.as_millis()),
            None => format!("{}\n", event.message),
        };
        let _ = io::stderr().write_all(line.as_bytes());
    }
}
