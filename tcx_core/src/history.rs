//! Upload history: the record of activities already delivered.
//!
//! A record's presence is the only signal that an activity was uploaded.
//! Records are write-once. The file-backed store appends one JSON line per
//! record under an exclusive lock and fsyncs before returning, so the fact
//! survives a crash later in the batch.

use crate::Result;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// One delivered activity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadRecord {
    pub activity_id: String,
    pub title: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Minimal key-value persistence for upload dedup
pub trait UploadHistory {
    fn has(&self, activity_id: &str) -> Result<bool>;

    /// Record a delivered activity. Must be durable when this returns.
    fn record(&mut self, activity_id: &str, title: &str, uploaded_at: DateTime<Utc>)
        -> Result<()>;
}

/// JSONL-based history with file locking
pub struct JsonlHistory {
    path: PathBuf,
    records: HashMap<String, UploadRecord>,
}

impl JsonlHistory {
    /// Open the history at `path`, loading existing records.
    ///
    /// A missing file is an empty history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = read_records(&path)?
            .into_iter()
            .map(|r| (r.activity_id.clone(), r))
            .collect();
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest upload first
    pub fn records(&self) -> Vec<UploadRecord> {
        let mut records: Vec<UploadRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        records
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl UploadHistory for JsonlHistory {
    fn has(&self, activity_id: &str) -> Result<bool> {
        Ok(self.records.contains_key(activity_id))
    }

    fn record(
        &mut self,
        activity_id: &str,
        title: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<()> {
        if self.records.contains_key(activity_id) {
            tracing::warn!("Upload of {} already recorded, keeping original", activity_id);
            return Ok(());
        }

        self.ensure_parent_dir()?;
        let record = UploadRecord {
            activity_id: activity_id.to_string(),
            title: title.to_string(),
            uploaded_at,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(&file);
            let line = serde_json::to_string(&record)?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        file.sync_all()?;
        file.unlock()?;

        tracing::debug!("Recorded upload of {}", activity_id);
        self.records.insert(record.activity_id.clone(), record);
        Ok(())
    }
}

/// In-memory history, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: HashMap<String, UploadRecord>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, activity_id: &str) -> Option<&UploadRecord> {
        self.records.get(activity_id)
    }
}

impl UploadHistory for MemoryHistory {
    fn has(&self, activity_id: &str) -> Result<bool> {
        Ok(self.records.contains_key(activity_id))
    }

    fn record(
        &mut self,
        activity_id: &str,
        title: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<()> {
        self.records
            .entry(activity_id.to_string())
            .or_insert_with(|| UploadRecord {
                activity_id: activity_id.to_string(),
                title: title.to_string(),
                uploaded_at,
            });
        Ok(())
    }
}

/// Read all records from a history file
pub fn read_records(path: &Path) -> Result<Vec<UploadRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<UploadRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                // A torn final line from a crash mid-write; the upload it
                // described is eligible for retry.
                tracing::warn!("Failed to parse history at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} upload records from {:?}", records.len(), path);
    Ok(records)
}

/// A row in the CSV export
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    activity_id: &'a str,
    title: &'a str,
    uploaded_at: String,
}

/// Export records to CSV, replacing any existing file. Returns rows written.
pub fn export_csv(records: &[UploadRecord], csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(csv_path)?;
    for record in records {
        writer.serialize(CsvRow {
            activity_id: &record.activity_id,
            title: &record.title,
            uploaded_at: record.uploaded_at.to_rfc3339(),
        })?;
    }
    writer.flush()?;

    tracing::info!("Exported {} upload records to {:?}", records.len(), csv_path);
    Ok(records.len())
}
