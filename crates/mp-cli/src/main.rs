//! `mp`, the command-line client for the manufacturing portal attachment API.
//!
//! Configuration comes from `--config` (layered with `MP__*` overrides) or
//! from the `MP_*` environment variables. Results are printed as JSON on
//! stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mp_attachments::{
    AttachmentApi, AttachmentFilter, AttachmentListView, QueueConfig, ReuploadOutcome,
    StationCatalog, StationCategory, StationConfig, UploadFile, UploadPanel, UploadStatus,
};
use mp_cli::{answer_gate, classify_name, init_tracing, PathPicker, StationSummary};
use mp_client::HttpAttachmentApi;
use mp_core::config::AppConfig;
use serde::Serialize;
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser)]
#[command(name = "mp", about = "Manufacturing portal attachment CLI")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured upload stations
    Stations,
    /// Show the file category (and kind, with --station) of file names
    Classify {
        files: Vec<String>,
        #[arg(long)]
        station: Option<String>,
    },
    /// List a work order's attachments
    List {
        #[arg(long)]
        work_order: String,
        /// Only attachments uploaded at this station
        #[arg(long)]
        station: Option<String>,
    },
    /// Upload files at a station
    Upload {
        #[arg(long)]
        work_order: String,
        #[arg(long)]
        station: String,
        /// Identifier to use instead of prompting
        #[arg(long)]
        identifier: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Replace an existing attachment with a new file
    Reupload {
        #[arg(long)]
        work_order: String,
        #[arg(long)]
        station: String,
        /// Server filename of the attachment to replace
        #[arg(long)]
        filename: String,
        #[arg(long)]
        identifier: Option<String>,
        file: PathBuf,
    },
    /// Delete an attachment
    Delete {
        #[arg(long)]
        work_order: String,
        #[arg(long)]
        filename: String,
    },
    /// Save an attachment's contents to a file
    Download {
        #[arg(long)]
        work_order: String,
        #[arg(long)]
        filename: String,
        #[arg(long)]
        output: PathBuf,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load(Some(path))
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::from_env().context("Invalid MP_* environment")?,
    };
    Ok(config)
}

fn station<'a>(catalog: &'a StationCatalog, name: &str) -> anyhow::Result<&'a StationConfig> {
    catalog
        .get(&StationCategory::from(name.trim()))
        .with_context(|| {
            let known: Vec<_> = catalog.iter().map(|s| s.category.to_string()).collect();
            format!("Unknown station {:?} (known: {})", name, known.join(", "))
        })
}

/// Let the gate be answered from stdin while `panel` works.
fn spawn_gate_driver(
    panel: &UploadPanel,
    identifier: Option<String>,
) -> tokio::task::JoinHandle<std::io::Result<mp_cli::GateAnswer>> {
    let gate = panel.gate().clone();
    tokio::spawn(async move {
        answer_gate(
            &gate,
            identifier,
            BufReader::new(tokio::io::stdin()),
            std::io::stderr(),
        )
        .await
    })
}

#[derive(Serialize)]
struct UploadSummary<'a> {
    status: &'a str,
    identifier: Option<String>,
    rejected: Vec<serde_json::Value>,
    report: Option<mp_attachments::BatchReport>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let catalog = StationCatalog::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Invalid station configuration: {}", e))?;

    if let Commands::Stations = cli.command {
        let stations: Vec<StationSummary> = catalog.iter().map(StationSummary::from).collect();
        return print_json(&stations);
    }
    if let Commands::Classify { files, station: name } = &cli.command {
        let station = name.as_deref().map(|n| station(&catalog, n)).transpose()?;
        let results: Vec<_> = files.iter().map(|f| classify_name(f, station)).collect();
        return print_json(&results);
    }

    let api: Arc<dyn AttachmentApi> = Arc::new(
        HttpAttachmentApi::from_config(&config.api).context("Failed to create API client")?,
    );
    info!(base_url = %config.api.base_url, "Using portal API");

    match cli.command {
        Commands::Stations | Commands::Classify { .. } => {}
        Commands::List {
            work_order,
            station: name,
        } => {
            let filter = match name {
                Some(name) => AttachmentFilter::for_station(station(&catalog, &name)?),
                None => AttachmentFilter::all(),
            };
            let view = AttachmentListView::new(api, work_order, filter);
            let attachments = view.refresh().await?;
            print_json(&*attachments)?;
        }
        Commands::Upload {
            work_order,
            station: name,
            identifier,
            files,
        } => {
            let station = station(&catalog, &name)?.clone();
            let mut staged = Vec::with_capacity(files.len());
            for path in &files {
                let file = UploadFile::from_path(path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?;
                staged.push(file);
            }

            let panel = UploadPanel::new(
                api,
                work_order,
                station,
                QueueConfig::from_config(&config),
                None,
            );
            let driver = spawn_gate_driver(&panel, identifier);
            let outcome = panel.upload_files(staged).await?;
            driver.abort();

            let rejected = outcome
                .rejected
                .iter()
                .map(|r| serde_json::json!({ "file": r.file.name(), "reason": r.reason.to_string() }))
                .collect();
            let summary = match outcome.status {
                UploadStatus::NothingAccepted => UploadSummary {
                    status: "nothing_accepted",
                    identifier: None,
                    rejected,
                    report: None,
                },
                UploadStatus::Cancelled => UploadSummary {
                    status: "cancelled",
                    identifier: None,
                    rejected,
                    report: None,
                },
                UploadStatus::Queued { identifier, handle } => {
                    let report = handle.wait().await?;
                    UploadSummary {
                        status: if report.is_success() { "completed" } else { "partial" },
                        identifier: Some(identifier),
                        rejected,
                        report: Some(report),
                    }
                }
            };
            print_json(&summary)?;

            let failed = summary.report.as_ref().map_or(0, |r| r.failed.len());
            if failed > 0 || !summary.rejected.is_empty() {
                bail!(
                    "{} file(s) rejected, {} upload(s) failed",
                    summary.rejected.len(),
                    failed
                );
            }
        }
        Commands::Reupload {
            work_order,
            station: name,
            filename,
            identifier,
            file,
        } => {
            let station = station(&catalog, &name)?.clone();
            let panel = UploadPanel::new(
                api.clone(),
                work_order.clone(),
                station,
                QueueConfig::from_config(&config),
                None,
            );

            let all = AttachmentListView::new(api, work_order, AttachmentFilter::all());
            all.refresh().await?;
            let existing = all
                .find(&filename)
                .with_context(|| format!("No attachment named {}", filename))?;

            let driver = spawn_gate_driver(&panel, identifier);
            let outcome = panel
                .reuploader(Arc::new(PathPicker::new(file)))
                .reupload(&existing)
                .await;
            driver.abort();

            match outcome? {
                ReuploadOutcome::NoFileSelected => bail!("No replacement file selected"),
                ReuploadOutcome::Cancelled => {
                    print_json(&serde_json::json!({ "status": "cancelled" }))?;
                }
                ReuploadOutcome::Queued {
                    replaced,
                    identifier,
                    handle,
                } => {
                    let report = handle.wait().await?;
                    let status = if report.is_success() { "completed" } else { "failed" };
                    print_json(&serde_json::json!({
                        "status": status,
                        "replaced": &replaced.filename,
                        "identifier": identifier,
                        "report": &report,
                    }))?;
                    if !report.is_success() {
                        bail!("{} was deleted but the replacement failed", replaced.filename);
                    }
                }
            }
        }
        Commands::Delete {
            work_order,
            filename,
        } => {
            let view = AttachmentListView::new(api, work_order, AttachmentFilter::all());
            view.delete(&filename).await?;
            print_json(&serde_json::json!({ "deleted": filename }))?;
        }
        Commands::Download {
            work_order,
            filename,
            output,
        } => {
            let view = AttachmentListView::new(api, work_order, AttachmentFilter::all());
            let data = view.download(&filename).await?;
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            print_json(&serde_json::json!({
                "filename": filename,
                "output": output.display().to_string(),
                "size": data.len(),
            }))?;
        }
    }

    Ok(())
}
