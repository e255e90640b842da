//! Append-only detection log.
//!
//! The sink owns row placement: every append lands after whatever is already
//! in the store, so the pipeline never tracks positions. If videos are ever
//! processed in parallel, appends must stay serialized through one writer.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::pipeline::BestDetection;
use crate::species;
use crate::timestamp::TimestampResult;

#[derive(Debug, thiserror::Error)]
#[error("could not append to {path}: {source}")]
pub struct SinkError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// One logged detection. Created only for videos with a best detection;
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LogRecord {
    pub date: String,
    pub time: String,
    pub species: String,
    pub scientific_name: String,
    pub count: u32,
    pub source_file: String,
    pub confidence: String,
}

impl LogRecord {
    pub fn new(timestamp: &TimestampResult, best: &BestDetection, source_file: &str) -> Self {
        Self {
            date: timestamp.date.clone(),
            time: timestamp.time.clone(),
            species: best.species.clone(),
            scientific_name: species::scientific_name(&best.species).to_string(),
            count: 1,
            source_file: source_file.to_string(),
            confidence: format!("Confidence: {:.0}%", best.confidence * 100.0),
        }
    }

    fn csv_row(&self) -> String {
        [
            csv_field(&self.date),
            csv_field(&self.time),
            csv_field(&self.species),
            csv_field(&self.scientific_name),
            Cow::Owned(self.count.to_string()),
            csv_field(&self.source_file),
            csv_field(&self.confidence),
        ]
        .join(",")
    }
}

/// Quotes a field only when it would break the row.
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

pub trait LogSink {
    fn append(&mut self, record: &LogRecord) -> Result<(), SinkError>;
}

/// Appends one CSV row per record, writing the header when it creates the
/// file.
pub struct CsvSink {
    path: PathBuf,
}

pub const CSV_HEADER: &str = "date,time,species,scientific_name,count,source_file,confidence";

impl CsvSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LogSink for CsvSink {
    fn append(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        let err = |source| SinkError {
            path: self.path.clone(),
            source,
        };
        let fresh = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(err)?;
        if fresh {
            writeln!(file, "{CSV_HEADER}").map_err(err)?;
        }
        writeln!(file, "{}", record.csv_row()).map_err(err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Provenance;

    fn record(species: &str, file: &str) -> LogRecord {
        LogRecord::new(
            &TimestampResult {
                date: "2024-03-11".to_string(),
                time: "14:05:22".to_string(),
                provenance: Provenance::Ocr,
            },
            &BestDetection {
                species: species.to_string(),
                confidence: 0.9,
                frame_index: 30,
            },
            file,
        )
    }

    #[test]
    fn record_fields() {
        let record = record("raccoon", "clip_0001.mp4");
        assert_eq!(record.scientific_name, "Procyon lotor");
        assert_eq!(record.count, 1);
        assert_eq!(record.confidence, "Confidence: 90%");
    }

    #[test]
    fn header_written_once_and_rows_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.csv");
        let mut sink = CsvSink::new(path.clone());
        sink.append(&record("raccoon", "a.mp4")).unwrap();
        sink.append(&record("bobcat", "b.mp4")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(
            lines[1],
            "2024-03-11,14:05:22,raccoon,Procyon lotor,1,a.mp4,Confidence: 90%"
        );
        assert!(lines[2].starts_with("2024-03-11,14:05:22,bobcat,Lynx rufus"));
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.csv");
        let mut sink = CsvSink::new(path.clone());
        sink.append(&record("frog sp.", "yard, back.mp4")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"yard, back.mp4\""));
    }
}
