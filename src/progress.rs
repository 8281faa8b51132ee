use std::{
    path::PathBuf,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::loader::PartitionRole;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One written partition document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PartitionRecord {
    pub role: PartitionRole,
    pub path: PathBuf,
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Debug)]
pub struct ProgressTracker {
    start: Instant,
    started_ms: u64,
    console: bool,
    written: Vec<PartitionRecord>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            started_ms: now_millis(),
            console: true,
            written: Vec::new(),
        }
    }

    /// Tracker that records but prints nothing to stdout.
    pub fn silent() -> Self {
        Self {
            console: false,
            ..Self::new()
        }
    }

    /// Emits the progress line for a partition about to be dumped.
    pub fn announce(&self, role: PartitionRole) {
        if self.console {
            println!("dumping {role}");
        }
        tracing::debug!(partition = %role, "dumping");
    }

    pub fn record(&mut self, record: PartitionRecord) {
        tracing::info!(
            partition = %record.role,
            entries = record.entries,
            bytes = record.bytes,
            path = %record.path.display(),
            "partition written"
        );
        self.written.push(record);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn report(&self) -> DumpReport {
        DumpReport {
            started_ms: self.started_ms,
            elapsed_ms: self.elapsed().as_millis() as u64,
            partitions: self.written.clone(),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a completed run.
#[derive(Clone, Debug, Serialize)]
pub struct DumpReport {
    pub started_ms: u64,
    pub elapsed_ms: u64,
    pub partitions: Vec<PartitionRecord>,
}

impl DumpReport {
    pub fn total_bytes(&self) -> usize {
        self.partitions.iter().map(|p| p.bytes).sum()
    }

    pub fn total_entries(&self) -> usize {
        self.partitions.iter().map(|p| p.entries).sum()
    }
}
