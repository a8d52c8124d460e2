//! # isofetch CLI
//!
//! Command-line interface for the isofetch library.
//! Downloads disk images from mirror lists, resuming interrupted transfers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use isofetch::core::checkpoint;
use isofetch::{
    retry_resumable, CancellationToken, Downloader, Error, JsonFileUrlStore,
    RemoteUrlCache, ResolverCommand, SourceEntry, BASE_RETRY_DELAY_MS, DEFAULT_CACHE_DIR,
    MAX_RETRY_ATTEMPTS,
};
use log::{error, info};

mod cli;

/// Command-line interface for isofetch
#[derive(Parser)]
#[command(name = "isofetch")]
#[command(about = "Resumable multi-mirror downloader for VM disk images")]
#[command(long_about = "Downloads large images, resuming where an earlier run stopped:
  isofetch ubuntu/24.10-server           # Ubuntu live-server from the first reachable mirror
  isofetch virtio -o /var/lib/vz/template/iso/
  isofetch https://a.example/x.iso https://b.example/x.iso   # your own mirror list

Windows-style images without a stable link:
  isofetch --resolver ./quickget --resolver-arg --url --resolver-arg windows \\
           --resolver-arg 11 --tag windows-11 --url-cache urls.json https://fallback.example/win11.iso")]
#[command(version = env!("ISOFETCH_VERSION"))]
struct Cli {
    /// Catalog identifier (e.g. "ubuntu/22.04-desktop", "virtio", "istoreos/24.10") or mirror URLs
    #[arg(required = true)]
    sources: Vec<String>,

    /// Output file or directory (defaults to the source's file name in the current directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory holding checkpoints and partial files
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Override the checkpoint file location
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// JSON file remembering resolved URLs; enables the remote-URL cache
    #[arg(long)]
    url_cache: Option<PathBuf>,

    /// Program printing the current download URL as "label: https://..."
    #[arg(long)]
    resolver: Option<String>,

    /// Argument passed to the resolver (repeatable)
    #[arg(long = "resolver-arg", allow_hyphen_values = true)]
    resolver_args: Vec<String>,

    /// Seconds to wait for the resolver
    #[arg(long, default_value_t = 120)]
    resolver_timeout: u64,

    /// Cache key for resolved URLs (defaults to one derived from the source)
    #[arg(long)]
    tag: Option<String>,

    /// Skip cached URLs containing this text (repeatable)
    #[arg(long)]
    reject: Vec<String>,

    /// Discard any existing checkpoint and partial file first
    #[arg(long)]
    fresh: bool,

    /// Retries after resumable failures
    #[arg(long, default_value_t = MAX_RETRY_ATTEMPTS)]
    retries: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .init();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if let Err(e) = run(cli, cancel).await {
        if matches!(e.downcast_ref::<Error>(), Some(Error::Cancelled)) {
            eprintln!("⏸️  Interrupted, run again to resume");
            std::process::exit(130);
        }
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

/// Merge every positional source into one entry; the first names the output.
fn merge_sources(sources: &[String]) -> anyhow::Result<SourceEntry> {
    let mut merged: Option<SourceEntry> = None;
    for source in sources {
        let entry = isofetch::resolve_source(source)?;
        match merged.as_mut() {
            Some(first) => first.mirrors.extend(entry.mirrors),
            None => merged = Some(entry),
        }
    }
    match merged {
        Some(entry) => Ok(entry),
        None => bail!("no source given"),
    }
}

fn resolve_dest(output: Option<&Path>, file_name: &str) -> PathBuf {
    match output {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(file_name),
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    if cli.verbose {
        eprintln!("isofetch v{} starting...", env!("ISOFETCH_VERSION"));
    }

    let mut entry = merge_sources(&cli.sources)?;
    if let Some(tag) = &cli.tag {
        entry.tag = isofetch::clean_tag(tag);
    }

    tokio::fs::create_dir_all(&cli.cache_dir)
        .await
        .with_context(|| format!("creating {}", cli.cache_dir.display()))?;
    let (default_checkpoint, partial_path) = isofetch::work_paths(&cli.cache_dir, &entry);
    let checkpoint_path = cli.checkpoint.clone().unwrap_or(default_checkpoint);
    let dest = resolve_dest(cli.output.as_deref(), &entry.file_name);

    if cli.fresh {
        discard(&checkpoint_path, &partial_path).await?;
    }

    let progress = cli::ProgressManager::new(&format!("🌐 Downloading {}", entry.file_name));
    let options = isofetch::DownloadOptions {
        progress: Some(progress.observer()),
        ..Default::default()
    };

    let mut downloader = Downloader::new()?.with_options(options);
    if let Some(path) = &cli.url_cache {
        downloader = downloader.with_cache(RemoteUrlCache::configured(JsonFileUrlStore::new(path)));
    }

    let resolver = cli.resolver.as_ref().map(|program| ResolverCommand {
        program: program.clone(),
        args: cli.resolver_args.clone(),
        timeout: Duration::from_secs(cli.resolver_timeout),
    });
    let reject: Vec<&str> = cli.reject.iter().map(String::as_str).collect();
    let candidates = downloader
        .resolve_candidates(&entry.tag, resolver.as_ref(), &entry.mirrors, &reject, &cancel)
        .await?;
    info!("{} candidate URL(s) for {}", candidates.len(), entry.tag);

    eprintln!("📁 Saving to: {}", dest.display());
    let result = retry_resumable(
        cli.retries,
        Duration::from_millis(BASE_RETRY_DELAY_MS),
        &cancel,
        || downloader.fetch(&checkpoint_path, &candidates, &partial_path, &dest, &cancel),
    )
    .await;

    match result {
        Ok(saved) => {
            progress.finish();
            eprintln!("✅ {} ready", saved.display());
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

/// Drop a previous attempt, including a partial file recorded elsewhere
async fn discard(checkpoint_path: &Path, partial_path: &Path) -> isofetch::Result<()> {
    if let Some(previous) = checkpoint::read(checkpoint_path).await {
        checkpoint::remove_file_if_exists(&previous.target_path).await?;
    }
    checkpoint::remove_file_if_exists(partial_path).await?;
    checkpoint::remove(checkpoint_path).await
}
