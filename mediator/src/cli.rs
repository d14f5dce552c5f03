/// # mediator CLI interface
///
/// Command parsing and the async entrypoint for the `mediator` binary. All
/// business logic lives in `mediator-core`; this module loads the config,
/// builds a [`Mediator`] and drives one command.
///
/// For programmatic or integration use, call [`run`] with a constructed [`Cli`].
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use tracing::{error, info};

use crate::app::Mediator;
use crate::load_config::load_config;
use mediator_core::bucket::{sanitize_bucket_name, validate_bucket_name};
use mediator_core::transfer::UploadRequest;

/// CLI for mediator: watch storage buckets and feed new objects to processors.
#[derive(Parser, Debug)]
#[clap(
    name = "mediator",
    version,
    about = "Listen for new objects in storage buckets and run file processors on them"
)]
pub struct Cli {
    /// Log output format
    #[clap(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen on the configured buckets until Ctrl-C
    Listen {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Extra bucket to listen on (repeatable)
        #[clap(long = "bucket")]
        buckets: Vec<String>,
    },
    /// Upload a local file into a bucket
    Upload {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        bucket: String,
        /// Local file to upload
        #[clap(long)]
        file: PathBuf,
        /// Object key; defaults to the file name
        #[clap(long)]
        key: Option<String>,
        /// Metadata entry as key=value (repeatable)
        #[clap(long = "meta", value_parser = parse_metadata)]
        metadata: Vec<(String, String)>,
    },
    /// Download an object to a local path
    Download {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        bucket: String,
        #[clap(long)]
        key: String,
        #[clap(long)]
        output: PathBuf,
    },
    /// List buckets and their object counts
    Buckets {
        #[clap(long)]
        config: PathBuf,
    },
}

fn parse_metadata(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

/// Rejects an invalid bucket name, suggesting a valid spelling when there is one.
fn check_bucket_name(bucket: &str) -> Result<()> {
    let Err(e) = validate_bucket_name(bucket) else {
        return Ok(());
    };
    let hint = match sanitize_bucket_name(bucket) {
        Some(suggestion) => format!("Invalid bucket name {bucket:?}, try {suggestion:?}"),
        None => format!("Invalid bucket name {bucket:?}"),
    };
    Err(anyhow::Error::new(e).context(hint))
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    // Top-level marker event, emitted before anything can fail.
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Listen { config, buckets } => {
            let mediator = Mediator::from_config(load_config(config)?);
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to wait for Ctrl-C, shutting down");
                }
            };
            listen_until(&mediator, &buckets, shutdown).await
        }
        Commands::Upload {
            config,
            bucket,
            file,
            key,
            metadata,
        } => {
            check_bucket_name(&bucket)?;
            let mediator = Mediator::from_config(load_config(config)?);
            let key = match key {
                Some(key) => key,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("{} has no file name", file.display()))?,
            };
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut request = UploadRequest::new(&bucket, &key, content);
            request.metadata.extend(metadata);

            let receipt = mediator
                .client
                .upload(request)
                .await
                .with_context(|| format!("Upload of {key} to {bucket} failed"))?;
            info!(command = "upload", ?receipt, "Upload complete");
            println!(
                "uploaded {}/{} ({}, {} bytes)",
                receipt.bucket, receipt.file_name, receipt.mime_type, receipt.size
            );
            Ok(())
        }
        Commands::Download {
            config,
            bucket,
            key,
            output,
        } => {
            let mediator = Mediator::from_config(load_config(config)?);
            mediator
                .client
                .download_to_path(&bucket, &key, &output)
                .await
                .with_context(|| format!("Download of {bucket}/{key} failed"))?;
            info!(command = "download", bucket = %bucket, key = %key, "Download complete");
            println!("downloaded {bucket}/{key} to {}", output.display());
            Ok(())
        }
        Commands::Buckets { config } => {
            let mediator = Mediator::from_config(load_config(config)?);
            let buckets = mediator
                .store
                .list_buckets()
                .await
                .context("Failed to list buckets")?;
            for bucket in buckets {
                let objects = mediator
                    .store
                    .list_objects(&bucket, "")
                    .await
                    .with_context(|| format!("Failed to list objects in {bucket}"))?;
                println!("{bucket}\t{}", objects.len());
            }
            Ok(())
        }
    }
}

/// Listens on the configured plus `extra` buckets until `shutdown` resolves,
/// then stops every subscription and waits for in-flight dispatches.
pub async fn listen_until<F>(mediator: &Mediator, extra: &[String], shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let buckets = mediator.buckets_to_watch(extra);
    if buckets.is_empty() {
        anyhow::bail!("No buckets to listen on: set listener.buckets or pass --bucket");
    }

    if let Err(e) = mediator.listener.start_listening(&buckets).await {
        error!(command = "listen", error = %e, "Failed to start listening");
        mediator.listener.stop_listening().await;
        return Err(anyhow::Error::new(e).context("Failed to start listening"));
    }
    info!(
        command = "listen",
        buckets = ?mediator.listener.listening_buckets(),
        processors = mediator.processors.len(),
        "Mediator listening, press Ctrl-C to stop"
    );

    shutdown.await;

    info!(command = "listen", in_flight = mediator.listener.in_flight(), "Shutting down");
    mediator.listener.stop_listening().await;
    mediator.listener.wait_idle().await;
    info!(command = "listen", "Mediator stopped");
    Ok(())
}
