//! File-backed persistence for pedsim sweep results and telemetry frames.

use pedsim_core::{ExperimentRow, Frame, ResultsSink};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_ROW_BUFFER: usize = 16;
const CSV_HEADER: [&str; 4] = ["mean", "variance", "efficiency", "discomfort"];

/// Storage error wrapper.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot infer an output format from {0:?}")]
    UnknownFormat(PathBuf),
}

/// On-disk layout of a results file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Header `mean,variance,efficiency,discomfort`; missing metrics are empty fields.
    #[default]
    Csv,
    /// Pretty-printed JSON array of rows.
    Json,
}

impl OutputFormat {
    /// Infer the format from a `.csv` or `.json` extension.
    pub fn from_path(path: &Path) -> Result<Self, StorageError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Ok(Self::Csv),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => Err(StorageError::UnknownFormat(path.to_path_buf())),
        }
    }
}

enum Backend {
    /// Rows are encoded in memory and appended; a failed append is truncated away.
    Csv(File),
    /// JSON arrays cannot be appended to, so every flush rewrites the file from `written`.
    Json { written: Vec<ExperimentRow> },
}

/// Buffered writer for [`ExperimentRow`]s.
pub struct ResultsStore {
    path: PathBuf,
    format: OutputFormat,
    backend: Backend,
    buffer: Vec<ExperimentRow>,
    flush_threshold: usize,
    rows_written: usize,
}

impl std::fmt::Debug for ResultsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultsStore")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("buffered", &self.buffer.len())
            .field("rows_written", &self.rows_written)
            .finish()
    }
}

impl ResultsStore {
    /// Create (or truncate) a results file with the default buffering threshold.
    pub fn create(path: impl AsRef<Path>, format: OutputFormat) -> Result<Self, StorageError> {
        Self::with_threshold(path, format, DEFAULT_ROW_BUFFER)
    }

    /// Create a results file that flushes once `threshold` rows are buffered.
    pub fn with_threshold(
        path: impl AsRef<Path>,
        format: OutputFormat,
        threshold: usize,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let backend = match format {
            OutputFormat::Csv => {
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_path(&path)?;
                writer.write_record(CSV_HEADER)?;
                writer.flush()?;
                drop(writer);
                Backend::Csv(OpenOptions::new().append(true).open(&path)?)
            }
            OutputFormat::Json => {
                fs::write(&path, b"[]\n")?;
                Backend::Json {
                    written: Vec::new(),
                }
            }
        };
        Ok(Self {
            path,
            format,
            backend,
            buffer: Vec::new(),
            flush_threshold: threshold.max(1),
            rows_written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Rows already flushed to disk.
    #[must_use]
    pub const fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Buffer a row, flushing when the threshold is met.
    pub fn append(&mut self, row: &ExperimentRow) -> Result<(), StorageError> {
        self.buffer.push(*row);
        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Force buffered rows to disk.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        match &mut self.backend {
            Backend::Csv(file) => append_csv(file, &self.buffer)?,
            Backend::Json { written } => {
                let combined = [written.as_slice(), self.buffer.as_slice()].concat();
                rewrite_json(&self.path, &combined)?;
                *written = combined;
            }
        }
        self.rows_written += self.buffer.len();
        debug!(
            path = %self.path.display(),
            rows = self.buffer.len(),
            total = self.rows_written,
            "flushed result rows"
        );
        self.buffer.clear();
        Ok(())
    }

    /// Flush and close the store, surfacing any write error.
    pub fn finish(mut self) -> Result<usize, StorageError> {
        self.flush()?;
        Ok(self.rows_written)
    }
}

fn append_csv(file: &mut File, rows: &[ExperimentRow]) -> Result<(), StorageError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| StorageError::Io(err.into_error()))?;

    let committed = file.metadata()?.len();
    if let Err(err) = file.write_all(&bytes).and_then(|()| file.flush()) {
        file.set_len(committed)?;
        return Err(err.into());
    }
    Ok(())
}

fn rewrite_json(path: &Path, rows: &[ExperimentRow]) -> Result<(), StorageError> {
    let mut file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut file, rows)?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

impl Drop for ResultsStore {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(path = %self.path.display(), "failed to flush result rows on drop: {err}");
        }
    }
}

impl ResultsSink for ResultsStore {
    fn on_row(&mut self, row: &ExperimentRow) {
        if let Err(err) = self.append(row) {
            warn!(
                mean = row.mean,
                variance = row.variance,
                "failed to store result row: {err}"
            );
        }
    }
}

/// Read back a results file written by [`ResultsStore`].
pub fn load_results(
    path: impl AsRef<Path>,
    format: OutputFormat,
) -> Result<Vec<ExperimentRow>, StorageError> {
    let path = path.as_ref();
    match format {
        OutputFormat::Csv => {
            let mut reader = csv::Reader::from_path(path)?;
            let rows = reader
                .deserialize()
                .collect::<Result<Vec<ExperimentRow>, _>>()?;
            Ok(rows)
        }
        OutputFormat::Json => {
            let reader = BufReader::new(File::open(path)?);
            Ok(serde_json::from_reader(reader)?)
        }
    }
}

/// Append-only JSON-lines log of telemetry [`Frame`]s.
pub struct FrameLog {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
}

impl std::fmt::Debug for FrameLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLog")
            .field("path", &self.path)
            .field("frames", &self.frames)
            .finish()
    }
}

impl FrameLog {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        Ok(Self {
            path,
            writer,
            frames: 0,
        })
    }

    /// Write one frame as a single JSON line.
    pub fn append(&mut self, frame: &Frame) -> Result<(), StorageError> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.write_all(b"\n")?;
        self.frames += 1;
        Ok(())
    }

    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for FrameLog {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            warn!(path = %self.path.display(), "failed to flush frame log on drop: {err}");
        }
    }
}

/// Read every frame from a JSON-lines log, skipping blank lines.
pub fn load_frames(path: impl AsRef<Path>) -> Result<Vec<Frame>, StorageError> {
    let reader = BufReader::new(File::open(path)?);
    let mut frames = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        frames.push(serde_json::from_str(&line)?);
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(mean: f64, variance: f64) -> ExperimentRow {
        ExperimentRow {
            mean,
            variance,
            efficiency: Some(0.9),
            discomfort: Some(0.05),
        }
    }

    #[test]
    fn format_is_inferred_from_extension() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/results.CSV")).expect("csv"),
            OutputFormat::Csv
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("results.json")).expect("json"),
            OutputFormat::Json
        );
        assert!(matches!(
            OutputFormat::from_path(Path::new("results.parquet")),
            Err(StorageError::UnknownFormat(_))
        ));
    }

    #[test]
    fn rows_stay_buffered_until_threshold() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("buffered.csv");
        let mut store = ResultsStore::with_threshold(&path, OutputFormat::Csv, 3)?;

        store.append(&row(0.0, 0.0))?;
        store.append(&row(0.0, 1.0))?;
        assert_eq!(store.rows_written(), 0);
        assert!(load_results(&path, OutputFormat::Csv)?.is_empty());

        store.append(&row(1.0, 0.0))?;
        assert_eq!(store.rows_written(), 3);
        assert_eq!(load_results(&path, OutputFormat::Csv)?.len(), 3);
        Ok(())
    }

    #[test]
    fn failed_json_flush_does_not_duplicate_rows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("rows.json");
        let mut store = ResultsStore::with_threshold(&path, OutputFormat::Json, 1)?;

        fs::remove_file(&path)?;
        fs::create_dir(&path)?;
        assert!(store.append(&row(1.0, 0.0)).is_err());
        assert_eq!(store.rows_written(), 0);

        fs::remove_dir(&path)?;
        store.append(&row(2.0, 0.0))?;
        assert_eq!(store.finish()?, 2);
        assert_eq!(
            load_results(&path, OutputFormat::Json)?,
            vec![row(1.0, 0.0), row(2.0, 0.0)]
        );
        Ok(())
    }

    #[test]
    fn csv_flushes_append_after_header() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("appended.csv");
        let mut store = ResultsStore::with_threshold(&path, OutputFormat::Csv, 1)?;
        store.append(&row(0.0, 0.0))?;
        store.append(&row(0.5, 1.0))?;
        drop(store);

        let text = fs::read_to_string(&path)?;
        assert_eq!(text.lines().next(), Some("mean,variance,efficiency,discomfort"));
        assert_eq!(text.lines().count(), 3);
        assert_eq!(
            load_results(&path, OutputFormat::Csv)?,
            vec![row(0.0, 0.0), row(0.5, 1.0)]
        );
        Ok(())
    }

    #[test]
    fn drop_flushes_pending_rows() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dropped.json");
        {
            let mut store = ResultsStore::with_threshold(&path, OutputFormat::Json, 100)?;
            store.on_row(&row(2.0, 0.5));
        }
        let rows = load_results(&path, OutputFormat::Json)?;
        assert_eq!(rows, vec![row(2.0, 0.5)]);
        Ok(())
    }
}
