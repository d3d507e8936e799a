//! Collectors.
//!
//! A collector samples a list of grabbers on a fixed period and holds the
//! rows until flushed. The on-disk layout is the collector's own (CSV
//! here); the driver only knows about sampling times and flushes.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use grid_base::{ObjectError, Time};
use serde::Serialize;
use tracing::info;

use crate::measure::GrabberSet;
use crate::network::Network;

/// One logged sample row.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorRow {
    pub time: f64,
    pub values: Vec<f64>,
}

pub struct Collector {
    name: String,
    file_name: String,
    directory: Option<PathBuf>,
    period: Time,
    next_sample: Time,
    start: Time,
    stop: Time,
    columns: Vec<String>,
    points: Vec<GrabberSet>,
    rows: Vec<CollectorRow>,
}

impl Collector {
    pub fn new(name: &str, period: Time) -> Collector {
        Collector {
            name: name.to_string(),
            file_name: format!("{name}.csv"),
            directory: None,
            period,
            next_sample: Time::ZERO,
            start: Time::ZERO,
            stop: Time::MAX,
            columns: Vec::new(),
            points: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the rows will land on flush.
    pub fn sink_name(&self) -> String {
        match &self.directory {
            Some(dir) => dir.join(&self.file_name).display().to_string(),
            None => self.file_name.clone(),
        }
    }

    pub fn set_directory(&mut self, directory: &Path) {
        self.directory = Some(directory.to_path_buf());
    }

    pub fn set_file_name(&mut self, file_name: &str) -> Result<(), ObjectError> {
        if file_name.is_empty() || file_name.contains(['\\', '\0']) {
            return Err(ObjectError::InvalidFileName(file_name.to_string()));
        }
        self.file_name = file_name.to_string();
        Ok(())
    }

    pub fn set_window(&mut self, start: Time, stop: Time) {
        self.start = start;
        self.stop = stop;
        self.next_sample = start;
    }

    pub fn add_point(&mut self, grabber: GrabberSet, column: &str) {
        self.columns.push(column.to_string());
        self.points.push(grabber);
    }

    pub fn next_sample_time(&self) -> Time {
        if self.next_sample > self.stop {
            Time::MAX
        } else {
            self.next_sample
        }
    }

    /// Take a sample if one is due at `time`.
    pub fn poll(&mut self, net: &Network, time: Time) {
        while time >= self.next_sample && self.next_sample <= self.stop {
            let values = self
                .points
                .iter()
                .map(|p| p.observe(net, time.as_secs()))
                .collect();
            self.rows.push(CollectorRow {
                time: self.next_sample.as_secs(),
                values,
            });
            self.next_sample += self.period;
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[CollectorRow] {
        &self.rows
    }

    /// Write everything collected so far as CSV.
    pub fn flush(&mut self) -> Result<(), ObjectError> {
        let path = match &self.directory {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .map_err(|e| ObjectError::FileOperation(e.to_string()))?;
                dir.join(&self.file_name)
            }
            None => PathBuf::from(&self.file_name),
        };
        let mut file =
            fs::File::create(&path).map_err(|e| ObjectError::FileOperation(e.to_string()))?;
        let header = std::iter::once("time".to_string())
            .chain(self.columns.iter().cloned())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(file, "{header}").map_err(|e| ObjectError::FileOperation(e.to_string()))?;
        for row in &self.rows {
            let line = std::iter::once(format!("{}", row.time))
                .chain(row.values.iter().map(|v| format!("{v}")))
                .collect::<Vec<_>>()
                .join(",");
            writeln!(file, "{line}").map_err(|e| ObjectError::FileOperation(e.to_string()))?;
        }
        info!(collector = %self.name, rows = self.rows.len(), sink = %path.display(), "collector flushed");
        Ok(())
    }
}
