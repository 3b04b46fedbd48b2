//! relaydrive: push files into Google Drive through the upload queue.
//!
//! Configuration comes from the environment (see `.env`). `upload` reads
//! local files; `relay` fetches a LINE message attachment and reports back
//! to the sender over LINE.

use anyhow::Context;
use clap::{Parser, Subcommand};
use relaydrive_cli::{start_queue, upload_local_files};
use relaydrive_core::Config;
use relaydrive_infra::{init_telemetry, shutdown_telemetry, LogFormat};
use relaydrive_services::LineClient;
use relaydrive_storage::create_storage;
use relaydrive_worker::{AttachmentRelay, BatchCollector, BatchConfig, RelayReceipt};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "relaydrive", about = "Upload files to Google Drive")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files, one at a time
    Upload {
        /// Files to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Owner recorded on the queue entries
        #[arg(long, default_value = "cli")]
        owner: String,
        /// Destination folder ID (defaults to GOOGLE_DRIVE_FOLDER_ID)
        #[arg(long)]
        destination: Option<String>,
    },
    /// Fetch a LINE message attachment and upload it
    Relay {
        /// LINE message ID
        message_id: String,
        /// Name to store the file under
        #[arg(long)]
        file_name: String,
        /// LINE user ID that receives the notifications
        #[arg(long)]
        owner: String,
    },
    /// List the most recent files in the destination folder
    List {
        /// Maximum number of files
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Get metadata of a single file
    Get {
        /// Drive file ID
        id: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize response")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let format: LogFormat = config.log_format.parse().unwrap_or_default();
    init_telemetry(format).map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let storage = create_storage(&config).context("Failed to create storage backend")?;

    match cli.command {
        Commands::Upload {
            paths,
            owner,
            destination,
        } => {
            let destination = destination.unwrap_or_else(|| config.drive_folder_id().to_string());
            let queue = start_queue(storage, &config.upload, &destination, None);
            let reports = upload_local_files(&queue, &owner, &paths, &config.upload).await;
            queue.shutdown().await;

            let failed = reports.iter().filter(|r| !r.success).count();
            print_json(&reports)?;
            if failed > 0 {
                anyhow::bail!("{} of {} file(s) failed to upload", failed, reports.len());
            }
        }
        Commands::Relay {
            message_id,
            file_name,
            owner,
        } => {
            let line = Arc::new(
                LineClient::new(&config.line).context("Failed to create LINE client")?,
            );
            let queue = start_queue(
                storage,
                &config.upload,
                config.drive_folder_id(),
                Some(line.clone()),
            );
            let batches = config.upload.batch_enabled.then(|| {
                BatchCollector::new(
                    queue.clone(),
                    line.clone(),
                    BatchConfig::from(&config.upload),
                )
            });
            let mut summaries = batches.as_ref().map(BatchCollector::subscribe);
            let relay = AttachmentRelay::new(queue.clone(), batches, line);

            match relay.handle_attachment(&owner, &message_id, &file_name).await {
                RelayReceipt::Queued { entry_id, notified } => {
                    notified.await.context("Notification task failed")?;
                    print_json(&queue.entry(entry_id).await)?;
                }
                RelayReceipt::Batched { .. } => {
                    if let Some(summaries) = summaries.as_mut() {
                        summaries.recv().await.context("Batch collector stopped")?;
                    }
                    if let Some(batches) = relay.batches() {
                        print_json(&batches.batch_status(&owner).await)?;
                    }
                }
            }
            queue.shutdown().await;
        }
        Commands::List { limit } => {
            let files = storage
                .list_files(config.drive_folder_id(), limit)
                .await
                .context("Failed to list files")?;
            print_json(&files)?;
        }
        Commands::Get { id } => {
            let file = storage
                .get_file(&id)
                .await
                .with_context(|| format!("Failed to get file {}", id))?;
            print_json(&file)?;
        }
    }

    shutdown_telemetry().await;
    Ok(())
}
