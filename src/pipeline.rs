use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    compression::Compression,
    encoder::{encode_partition, EncodeOptions, TextDocument},
    error::{DumpError, DumpResult},
    loader::{self, Partition, PartitionRole, DEFAULT_SOURCE},
    progress::{DumpReport, PartitionRecord, ProgressTracker},
};

pub const DEFAULT_OUTPUT_DIR: &str = "../target";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpConfig {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    /// `None` picks the compression from the source extension.
    pub compression: Option<Compression>,
    pub encode: EncodeOptions,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            compression: None,
            encode: EncodeOptions::default(),
        }
    }
}

impl DumpConfig {
    pub fn destination(&self, role: PartitionRole) -> PathBuf {
        self.output_dir.join(role.file_name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Loaded,
    Encoding(PartitionRole),
    Done,
    Failed,
}

pub struct Pipeline<'a> {
    config: &'a DumpConfig,
    state: PipelineState,
    progress: ProgressTracker,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a DumpConfig) -> Self {
        Self::with_progress(config, ProgressTracker::new())
    }

    pub fn with_progress(config: &'a DumpConfig, progress: ProgressTracker) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            progress,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }

    /// Runs to `Done`, or to `Failed` with the first error.
    pub fn run(&mut self) -> DumpResult<DumpReport> {
        match self.execute() {
            Ok(()) => {
                self.transition(PipelineState::Done);
                Ok(self.progress.report())
            }
            Err(err) => {
                tracing::error!(stage = err.stage(), "dump failed: {err}");
                self.transition(PipelineState::Failed);
                Err(err)
            }
        }
    }

    fn execute(&mut self) -> DumpResult<()> {
        let dataset = loader::load(&self.config.source, self.config.compression)?;
        self.transition(PipelineState::Loaded);

        for partition in dataset.into_partitions() {
            self.transition(PipelineState::Encoding(partition.role));
            self.progress.announce(partition.role);

            let destination = self.config.destination(partition.role);
            let bytes = dump_partition(&partition, &destination, &self.config.encode)?;
            self.progress.record(PartitionRecord {
                role: partition.role,
                path: destination,
                entries: partition.len(),
                bytes,
            });
        }
        Ok(())
    }
}

/// Converts the source named by `config` into three partition documents.
pub fn run(config: &DumpConfig) -> DumpResult<DumpReport> {
    Pipeline::new(config).run()
}

/// Encodes one partition and writes it to `destination`, returning the
/// number of bytes written.
pub fn dump_partition(
    partition: &Partition,
    destination: &Path,
    options: &EncodeOptions,
) -> DumpResult<usize> {
    let document =
        encode_partition(partition, options).map_err(|source| DumpError::UnencodableValue {
            partition: partition.role,
            source,
        })?;
    write_document(destination, &document)?;
    Ok(document.len())
}

/// Writes a whole document in one call, replacing any previous file.
pub fn write_document(path: &Path, document: &TextDocument) -> DumpResult<()> {
    let write_failure = |source| DumpError::DestinationWriteFailure {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_failure)?;
    }
    fs::write(path, document.as_bytes()).map_err(write_failure)
}
