// src/sink.rs
//
// Persistence of finalized items. One record per id; storing an id that
// is already present is a no-op.

use crate::types::DetectionRecord;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    Duplicate,
}

pub trait ResultSink: Send {
    fn store(&mut self, record: &DetectionRecord) -> Result<StoreOutcome>;
}

// ============================================================================
// JSONL FILE
// ============================================================================

pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    ids: HashSet<String>,
}

impl JsonlSink {
    /// Open (or create) the record file. Ids already in the file are
    /// loaded so a restart does not store them twice.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let ids = if path.exists() {
            Self::read_ids(path)?
        } else {
            HashSet::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open record file {}", path.display()))?;

        info!(
            "✓ Record file {} ready ({} existing records)",
            path.display(),
            ids.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            ids,
        })
    }

    fn read_ids(path: &Path) -> Result<HashSet<String>> {
        let file = File::open(path)
            .with_context(|| format!("Failed to read record file {}", path.display()))?;

        let mut ids = HashSet::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<DetectionRecord>(&line) {
                Ok(record) => {
                    ids.insert(record.id);
                }
                Err(e) => warn!(
                    "Skipping malformed record at {}:{}: {}",
                    path.display(),
                    lineno + 1,
                    e
                ),
            }
        }
        Ok(ids)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl ResultSink for JsonlSink {
    fn store(&mut self, record: &DetectionRecord) -> Result<StoreOutcome> {
        if self.ids.contains(&record.id) {
            debug!("Record {} already stored", record.id);
            return Ok(StoreOutcome::Duplicate);
        }

        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", line)?;
        self.writer
            .flush()
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        self.ids.insert(record.id.clone());
        Ok(StoreOutcome::Inserted)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Keeps records in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<DetectionRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ResultSink for MemorySink {
    fn store(&mut self, record: &DetectionRecord) -> Result<StoreOutcome> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.iter().any(|r| r.id == record.id) {
            return Ok(StoreOutcome::Duplicate);
        }
        records.push(record.clone());
        Ok(StoreOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Classification;

    fn record(id: &str) -> DetectionRecord {
        DetectionRecord {
            id: id.to_string(),
            timestamp: "2024-05-01 10:00:00".to_string(),
            waste_type: "Tin/Steel Can".to_string(),
            confidence_level: "91.0%".to_string(),
            contamination: 18.5,
            classification: Classification::HighValue,
        }
    }

    #[test]
    fn test_memory_sink_insert_once() {
        let mut sink = MemorySink::new();
        let view = sink.clone();
        assert_eq!(sink.store(&record("K9Z2")).unwrap(), StoreOutcome::Inserted);
        assert_eq!(sink.store(&record("K9Z2")).unwrap(), StoreOutcome::Duplicate);
        assert_eq!(view.records().len(), 1);
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("detections.jsonl");

        let mut sink = JsonlSink::open(&path).unwrap();
        sink.store(&record("AAAA")).unwrap();
        sink.store(&record("BBBB")).unwrap();
        assert_eq!(sink.store(&record("AAAA")).unwrap(), StoreOutcome::Duplicate);
        drop(sink);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DetectionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, record("AAAA"));
    }

    #[test]
    fn test_jsonl_sink_remembers_ids_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.jsonl");

        JsonlSink::open(&path).unwrap().store(&record("AAAA")).unwrap();

        let mut reopened = JsonlSink::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.store(&record("AAAA")).unwrap(), StoreOutcome::Duplicate);
        assert_eq!(reopened.store(&record("CCCC")).unwrap(), StoreOutcome::Inserted);
    }

    #[test]
    fn test_jsonl_sink_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.jsonl");
        let good = serde_json::to_string(&record("DDDD")).unwrap();
        fs::write(&path, format!("not json\n{}\n\n", good)).unwrap();

        let sink = JsonlSink::open(&path).unwrap();
        assert_eq!(sink.len(), 1);
    }
}
