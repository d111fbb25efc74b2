mod probe;

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use chantools_core::{BatchPolicy, ChannelConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::probe::{Probe, ProbeOptions};

/// Fill a bounded channel from concurrent producers, then peek at it and
/// try a batch read.
#[derive(Parser, Debug)]
#[command(name = "chanprobe", version)]
struct Opts {
    /// JSON channel config; flags below override its fields
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ring capacity (0 = unbuffered)
    #[arg(long)]
    capacity: Option<usize>,

    /// Element size in bytes
    #[arg(long)]
    elem_size: Option<usize>,

    /// Element alignment in bytes
    #[arg(long)]
    elem_align: Option<usize>,

    /// Number of producer tasks
    #[arg(short, long, default_value = "2")]
    producers: usize,

    /// Elements sent by each producer
    #[arg(short = 'n', long, default_value = "4")]
    per_producer: usize,

    /// Minimum element count for the batch read
    #[arg(short, long, default_value = "1")]
    minimum: usize,

    /// Consume the batch instead of copying it
    #[arg(long)]
    drain: bool,

    /// Close the channel before the batch read
    #[arg(long)]
    close: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl Opts {
    fn channel_config(&self) -> anyhow::Result<ChannelConfig> {
        let mut config = match &self.config {
            Some(path) => ChannelConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ChannelConfig::default(),
        };
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(size) = self.elem_size {
            config.elem_size = size;
        }
        if let Some(align) = self.elem_align {
            config.elem_align = align;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let opts = Opts::parse();
    let config = opts.channel_config()?;

    let probe = Probe::new(&config).context("building channel")?;
    let outcome = probe
        .run(ProbeOptions {
            producers: opts.producers,
            per_producer: opts.per_producer,
            minimum: opts.minimum,
            policy: if opts.drain { BatchPolicy::Drain } else { BatchPolicy::Copy },
            close: opts.close,
        })
        .await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", outcome);
    }

    Ok(())
}
