use std::{fs, path::Path};

use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::{
    compression::Compression,
    error::{DumpError, DumpResult},
    pickle,
    value::Value,
};

pub const DEFAULT_SOURCE: &str = "./mnist.pkl.gz";

/// The three partitions, in the order they are stored and dumped.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    Training,
    Validation,
    Testing,
}

impl PartitionRole {
    pub fn file_name(&self) -> String {
        format!("mnist_{self}.json")
    }
}

/// Aligned feature vectors and labels of one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    pub role: PartitionRole,
    pub features: Value,
    pub labels: Value,
}

fn entry_count(role: PartitionRole, field: &str, value: &Value) -> DumpResult<usize> {
    match value {
        Value::Array(_) | Value::Sequence(_) => value.len().ok_or_else(|| {
            DumpError::MalformedSource(format!("{role} {field} is a 0-d array"))
        }),
        other => Err(DumpError::MalformedSource(format!(
            "{role} {field} is a {}, expected an array or sequence",
            other.type_name()
        ))),
    }
}

impl Partition {
    pub fn new(role: PartitionRole, features: Value, labels: Value) -> DumpResult<Self> {
        let n_features = entry_count(role, "features", &features)?;
        let n_labels = entry_count(role, "labels", &labels)?;
        if n_features != n_labels {
            return Err(DumpError::MalformedSource(format!(
                "{role} has {n_features} feature vectors but {n_labels} labels"
            )));
        }
        Ok(Self {
            role,
            features,
            labels,
        })
    }

    /// Builds a partition from a stored `(features, labels)` pair.
    pub fn from_pair(role: PartitionRole, pair: Value) -> DumpResult<Self> {
        match pair {
            Value::Sequence(items) if items.len() == 2 => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(features), Some(labels)) => Partition::new(role, features, labels),
                    _ => Err(DumpError::MalformedSource(format!(
                        "{role} is not a (features, labels) pair"
                    ))),
                }
            }
            other => Err(DumpError::MalformedSource(format!(
                "{role} is a {} of {} entries, expected a (features, labels) pair",
                other.type_name(),
                other.len().unwrap_or(0)
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    pub training: Partition,
    pub validation: Partition,
    pub test: Partition,
}

impl Dataset {
    /// Unpacks a deserialized `(training, validation, test)` triple.
    pub fn from_value(value: Value) -> DumpResult<Self> {
        let items = match value {
            Value::Sequence(items) if items.len() == 3 => items,
            other => {
                return Err(DumpError::MalformedSource(format!(
                    "expected 3 partitions at the top level, found a {} with {} entries",
                    other.type_name(),
                    other.len().unwrap_or(0)
                )))
            }
        };

        let mut partitions = PartitionRole::iter()
            .zip(items)
            .map(|(role, pair)| Partition::from_pair(role, pair));
        let mut next = || {
            partitions
                .next()
                .unwrap_or_else(|| Err(DumpError::MalformedSource("missing partition".into())))
        };
        let training = next()?;
        let validation = next()?;
        let test = next()?;

        Ok(Self {
            training,
            validation,
            test,
        })
    }

    pub fn partitions(&self) -> [&Partition; 3] {
        [&self.training, &self.validation, &self.test]
    }

    pub fn into_partitions(self) -> [Partition; 3] {
        [self.training, self.validation, self.test]
    }
}

/// Reads, decompresses and unpickles the source in one pass.
///
/// The file handle is released as soon as the bytes are read. `compression`
/// defaults to what the file extension implies.
pub fn load(path: impl AsRef<Path>, compression: Option<Compression>) -> DumpResult<Dataset> {
    let path = path.as_ref();
    let compression = compression.unwrap_or_else(|| Compression::from_path(path));

    let raw = fs::read(path).map_err(|source| DumpError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = raw.len(), ?compression, "read source");

    let bytes = compression
        .decompress(&raw)
        .map_err(|err| DumpError::MalformedSource(format!("cannot decompress {}: {err}", path.display())))?;
    drop(raw);

    let dataset = Dataset::from_value(pickle::from_slice(&bytes)?)?;
    for partition in dataset.partitions() {
        let shape = match &partition.features {
            Value::Array(array) => format!("{:?}", array.shape()),
            other => other.type_name(),
        };
        tracing::debug!(
            partition = %partition.role,
            entries = partition.len(),
            features = %shape,
            "loaded partition"
        );
    }
    Ok(dataset)
}
