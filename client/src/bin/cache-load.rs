//! Drives a client over the in-process backend and reports its counters.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use remote_cache_client::{
    ClientConfig, ClientError, LoggingConfig, MemoryBackend, RemoteCacheClient,
};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "cache-load")]
#[command(about = "Exercise the remote cache client against an in-process backend")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Client name used in logs and counter labels
    #[arg(long, default_value = "cache-load")]
    name: String,

    /// Number of distinct keys to write and read back
    #[arg(long, default_value_t = 10_000)]
    keys: usize,

    /// Value size in bytes
    #[arg(long, default_value_t = 128)]
    value_size: usize,

    /// TTL in seconds for written items (0 = no expiry)
    #[arg(long, default_value_t = 60)]
    ttl: u64,

    /// Keys requested per get_multi call
    #[arg(long, default_value_t = 1_000)]
    read_width: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoadConfig {
    #[serde(default)]
    client: ClientConfig,

    #[serde(default)]
    logging: LoggingConfig,
}

impl LoadConfig {
    fn load(path: &Path) -> Result<Self, ClientError> {
        let content = std::fs::read_to_string(path)?;
        let config: LoadConfig = toml::from_str(&content)?;
        config.client.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default)]
struct Summary {
    queued: usize,
    rejected_full: usize,
    rejected_other: usize,
    requested: usize,
    hits: usize,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match LoadConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        },
        None => LoadConfig::default(),
    };

    if let Err(e) = remote_cache_client::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(args, config.client)) {
        tracing::error!(error = %e, "load run failed");
        std::process::exit(1);
    }
}

async fn run(args: Args, config: ClientConfig) -> Result<(), ClientError> {
    let client = RemoteCacheClient::new(&args.name, config, Arc::new(MemoryBackend::new()))?;

    let mut summary = Summary::default();
    let start = Instant::now();

    tokio::select! {
        _ = exercise(&client, &args, &mut summary) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping client");
        }
    }

    client.stop().await;
    print_summary(&client, &summary, start.elapsed());
    Ok(())
}

async fn exercise(client: &RemoteCacheClient, args: &Args, summary: &mut Summary) {
    let value = bytes::Bytes::from(vec![b'x'; args.value_size]);
    let ttl = Duration::from_secs(args.ttl);
    let keys: Vec<String> = (0..args.keys).map(|i| format!("key:{i}")).collect();

    for key in &keys {
        match client.set_async(key.as_bytes(), value.clone(), ttl) {
            Ok(()) => summary.queued += 1,
            Err(ClientError::QueueFull) => {
                summary.rejected_full += 1;
                tokio::task::yield_now().await;
            }
            Err(e) => {
                summary.rejected_other += 1;
                tracing::debug!(key = %key, error = %e, "write rejected");
            }
        }
    }

    while client.pending_writes() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    for chunk in keys.chunks(args.read_width.max(1)) {
        summary.requested += chunk.len();
        summary.hits += client.get_multi(chunk).await.len();
    }
}

fn print_summary(client: &RemoteCacheClient, summary: &Summary, elapsed: Duration) {
    println!("elapsed: {:.3}s", elapsed.as_secs_f64());
    println!(
        "writes: queued {} rejected(full) {} rejected(other) {}",
        summary.queued, summary.rejected_full, summary.rejected_other
    );
    println!("reads: requested {} hits {}", summary.requested, summary.hits);
    println!();
    for (name, value) in client.metrics().counter_values() {
        println!("{name} {value}");
    }
}

fn print_default_config() {
    let config = r#"# cache-load configuration

[client]
# Largest value accepted for writes (0 = unbounded)
max_item_size = "16MB"

# Async write workers
max_async_concurrency = 50

# Async write queue capacity
max_async_buffer_size = 25000

# Multi-get batches allowed in flight at once (0 = unlimited)
max_get_multi_concurrency = 100

# Keys per backend multi-get call
get_multi_batch_size = 100

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "info"

# Log format: "pretty", "json", or "compact"
format = "pretty"
"#;
    print!("{config}");
}
