use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use mnist_dump::{
    compression::Compression,
    encoder::{DocumentLayout, DocumentStyle, EncodeOptions, DEFAULT_MAX_DEPTH},
    loader::DEFAULT_SOURCE,
    pipeline::{self, DumpConfig, DEFAULT_OUTPUT_DIR},
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CompressionArg {
    Auto,
    None,
    Gzip,
}

impl CompressionArg {
    fn into_compression(self) -> Option<Compression> {
        match self {
            CompressionArg::Auto => None,
            CompressionArg::None => Some(Compression::None),
            CompressionArg::Gzip => Some(Compression::Gzip),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "mnist_dump",
    about = "Convert a pickled MNIST dataset into one JSON document per partition."
)]
struct Cli {
    /// Pickled (training, validation, test) dataset to read
    #[arg(long, default_value = DEFAULT_SOURCE)]
    source: PathBuf,

    /// Directory receiving mnist_training.json, mnist_validation.json and mnist_testing.json
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Source compression (auto = infer from the file extension)
    #[arg(long, value_enum, default_value_t = CompressionArg::Auto)]
    compression: CompressionArg,

    /// Top-level shape of each document
    #[arg(long, value_enum, default_value_t = DocumentLayout::Pair)]
    layout: DocumentLayout,

    /// Separator style of the rendered text
    #[arg(long, value_enum, default_value_t = DocumentStyle::Python)]
    style: DocumentStyle,

    /// Maximum nesting depth accepted by the encoder
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Print the run report as JSON once all partitions are written
    #[arg(long, default_value_t = false)]
    report: bool,
}

impl Cli {
    fn to_config(&self) -> DumpConfig {
        DumpConfig {
            source: self.source.clone(),
            output_dir: self.output_dir.clone(),
            compression: self.compression.into_compression(),
            encode: EncodeOptions {
                max_depth: self.max_depth,
                layout: self.layout,
                style: self.style,
            },
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mnist_dump=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.to_config();
    tracing::debug!(?config, "starting dump");

    let report = pipeline::run(&config).map_err(|err| {
        let stage = err.stage();
        anyhow::Error::new(err).context(format!("{stage} stage failed"))
    })?;

    if cli.report {
        let json = serde_json::to_string_pretty(&report).context("serialize run report")?;
        println!("{json}");
    }
    Ok(())
}
