use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::{FaceId, Gallery, MediaRef, PersonId};
use likeness_store::SqliteStore;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod spool;

use config::Config;
use engine::{EngineHandle, IngestResult};
use spool::{Spool, SpoolBatch};

#[derive(Parser)]
#[command(name = "likenessd", about = "Likeness face gallery daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run periodic reconciliation and ingest spooled detection batches
    Serve,
    /// Ingest one detection batch file
    Ingest {
        /// JSON batch: {"media": "...", "detections": [...]}
        file: PathBuf,
    },
    /// Run one reconciliation pass over unassigned faces
    Group,
    /// List persons with face counts and media
    People,
    /// Set or clear a person's display name
    Rename {
        person: PersonId,
        /// New name; omit to clear
        name: Option<String>,
    },
    /// Move every face of one person into another
    Merge {
        /// Person that survives
        keep: PersonId,
        /// Person that is absorbed and deleted
        absorb: PersonId,
    },
    /// Delete all faces of a media item
    DeleteMedia { media: String },
    /// Delete a single face
    DeleteFace { face: FaceId },
    /// Show gallery counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load()?;
    tracing::debug!(?cfg, "configuration loaded");

    let store = SqliteStore::open(&cfg.db_path)
        .with_context(|| format!("opening {}", cfg.db_path.display()))?;
    let (engine, engine_thread) =
        engine::spawn_engine(Gallery::new(store, cfg.gallery()), cfg.regroup_after_ingest)?;

    let outcome = run(cli.command, &cfg, &engine).await;

    drop(engine);
    tokio::task::spawn_blocking(move || engine_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;
    outcome
}

async fn run(command: Commands, cfg: &Config, engine: &EngineHandle) -> Result<()> {
    let cancel = CancellationToken::new();

    match command {
        Commands::Serve => serve(cfg, engine, cancel).await?,
        Commands::Ingest { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let batch: SpoolBatch = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing {}", file.display()))?;
            let results = engine.ingest(batch.media, batch.detections, cancel).await?;
            print_json(&ingest_json(&results))?;
        }
        Commands::Group => print_json(&engine.group_faces(cancel).await?)?,
        Commands::People => print_json(&engine.people().await?)?,
        Commands::Rename { person, name } => {
            engine.rename_person(person, name).await?;
            println!("renamed {person}");
        }
        Commands::Merge { keep, absorb } => {
            let moved = engine.merge_persons(keep, absorb, cancel).await?;
            println!("moved {moved} faces from {absorb} into {keep}");
        }
        Commands::DeleteMedia { media } => {
            print_json(&engine.delete_media(MediaRef::new(media)).await?)?
        }
        Commands::DeleteFace { face } => print_json(&engine.delete_face(face).await?)?,
        Commands::Status => print_json(&engine.status().await?)?,
    }

    Ok(())
}

/// Poll the spool and run scheduled reconciliation until Ctrl-C.
///
/// Ctrl-C cancels `cancel` first; the sweep or pass in flight winds down
/// through it and is awaited before returning.
async fn serve(cfg: &Config, engine: &EngineHandle, cancel: CancellationToken) -> Result<()> {
    tracing::info!(
        db = %cfg.db_path.display(),
        spool = %cfg.spool_dir.display(),
        max_distance = cfg.max_distance,
        tie_break = %cfg.tie_break,
        "likenessd serving"
    );

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
        }
        on_interrupt.cancel();
    });

    let spool = Spool::new(&cfg.spool_dir);
    let mut regroup = tokio::time::interval(Duration::from_secs(cfg.regroup_interval_secs.max(1)));
    let mut poll = tokio::time::interval(Duration::from_secs(cfg.spool_poll_secs.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = poll.tick() => match spool.drain(engine, &cancel).await {
                Ok(report) if report.batches + report.faces_requeued + report.unreadable > 0 => {
                    tracing::info!(?report, "spool drained");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "spool drain failed"),
            },
            _ = regroup.tick() => {
                if let Err(e) = engine.group_faces(cancel.child_token()).await {
                    tracing::warn!(error = %e, "scheduled reconciliation failed");
                }
            }
        }
    }

    tracing::info!("likenessd shutting down");
    Ok(())
}

#[derive(Serialize)]
#[serde(untagged)]
enum FaceOutcome<'a> {
    Assigned(&'a likeness_core::FaceAssignment),
    Rejected { error: String },
}

fn ingest_json(results: &IngestResult) -> Vec<FaceOutcome<'_>> {
    results
        .iter()
        .map(|r| match r {
            Ok(a) => FaceOutcome::Assigned(a),
            Err(e) => FaceOutcome::Rejected { error: e.to_string() },
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
