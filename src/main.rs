use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use tms_bridge::settings::load_settings;
use tms_bridge::{build_orchestrator, profile_usage, worklist};

#[derive(Parser, Debug)]
#[command(
    name = "tms-bridge",
    version,
    about = "Keep content units in sync with a translation management system"
)]
struct Cli {
    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "settings")]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Talk to an in-process TMS and keep metadata in memory
    #[arg(long = "dry-run")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the TMS notification webhook
    Serve {
        /// Listen address (default: [server] addr)
        #[arg(long = "addr")]
        addr: Option<String>,
    },
    /// Record a local save: detects edits and uploads when the profile asks for it
    Save { unit: String },
    /// Upload or re-upload the source content of a unit
    Upload {
        unit: String,
        /// Attach the document to a TMS job
        #[arg(long = "job")]
        job: Option<String>,
    },
    /// Poll the TMS for pending work (all tracked units when none are given)
    Check { units: Vec<String> },
    /// Request a translation for one locale
    Request { unit: String, locale: String },
    /// Download a finished translation
    Download { unit: String, locale: String },
    /// Print metadata, profile and available actions of a unit
    Status { unit: String },
    /// Assign a profile to a unit; omit the profile to fall back to the default
    Assign { unit: String, profile: Option<String> },
    /// Stop translating a unit
    Disable { unit: String },
    /// Resume translating a disabled unit
    Enable { unit: String },
    /// List configured profiles and how many units use each
    Profiles,
    /// Remove the remote document and untrack the unit
    Delete {
        unit: String,
        /// Archive instead of deleting
        #[arg(long = "archive")]
        archive: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tms_bridge::logging::init(cli.verbose)?;

    let settings = load_settings(cli.settings.as_deref())?;
    let orchestrator = Arc::new(build_orchestrator(&settings, cli.dry_run)?);

    match cli.command {
        Command::Serve { addr } => {
            let addr = addr.unwrap_or_else(|| settings.server_addr.clone());
            tms_bridge::server::run_server(orchestrator, addr).await?;
        }
        Command::Save { unit } => {
            let outcome = orchestrator
                .on_content_saved(&unit.as_str().into())
                .await
                .with_context(|| format!("failed to process save of {}", unit))?;
            print_json(&outcome)?;
        }
        Command::Upload { unit, job } => {
            let document_id = orchestrator
                .upload(&unit.as_str().into(), job.as_deref())
                .await
                .with_context(|| format!("failed to upload {}", unit))?;
            println!("{}", document_id);
        }
        Command::Check { units } => {
            let units = if units.is_empty() {
                orchestrator.store().unit_ids()
            } else {
                units.into_iter().map(Into::into).collect()
            };
            let report =
                worklist::run_checks(&orchestrator, units, settings.worklist_concurrency).await;
            print_json(&report)?;
        }
        Command::Request { unit, locale } => {
            let status = orchestrator
                .request_target(&unit.as_str().into(), &locale)
                .await
                .with_context(|| format!("failed to request {} for {}", locale, unit))?;
            println!("{}", status);
        }
        Command::Download { unit, locale } => {
            let status = orchestrator
                .download_target(&unit.as_str().into(), &locale)
                .await
                .with_context(|| format!("failed to download {} for {}", locale, unit))?;
            println!("{}", status);
        }
        Command::Status { unit } => {
            print_json(&orchestrator.report(&unit.as_str().into())?)?;
        }
        Command::Assign { unit, profile } => {
            let metadata = orchestrator.assign_profile(&unit.as_str().into(), profile.as_deref())?;
            print_json(&metadata)?;
        }
        Command::Disable { unit } => {
            print_json(&orchestrator.disable(&unit.as_str().into())?)?;
        }
        Command::Enable { unit } => {
            print_json(&orchestrator.enable(&unit.as_str().into())?)?;
        }
        Command::Profiles => {
            for (id, count) in profile_usage(&orchestrator) {
                println!("{}\t{}", id, count);
            }
        }
        Command::Delete { unit, archive } => {
            let id = unit.as_str().into();
            let removed = if archive {
                orchestrator.archive_document(&id).await
            } else {
                orchestrator.delete_document(&id).await
            };
            removed.with_context(|| format!("failed to remove document of {}", unit))?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
