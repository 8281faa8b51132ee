pub mod compression;
pub mod encoder;
pub mod error;
pub mod loader;
pub mod pickle;
pub mod pipeline;
pub mod progress;
pub mod value;

pub use encoder::{encode, encode_partition, EncodeError, EncodeOptions, TextDocument};
pub use error::{DumpError, DumpResult};
pub use loader::{load, Dataset, Partition, PartitionRole};
pub use pipeline::{run, DumpConfig, Pipeline, PipelineState};
pub use progress::DumpReport;
pub use value::{ElementKind, NumericArray, Scalar, Value};
