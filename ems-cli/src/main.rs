//! EMS command line.
//!
//! `ems demo` runs the full pipeline in-process against the in-memory
//! collaborators and prints the resulting financial and audit trail;
//! `ems config` prints the resolved configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ems_config::EmsConfig;
use ems_connectors::{Clock, DocumentStore, SledDocumentStore, SysClock};
use ems_engine::audit::AUDIT_COLLECTION;
use ems_engine::bootstrap::EmsRuntime;
use ems_engine::ingest::NewEndorsement;
use ems_engine::model::{Employer, EndorsementType};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ems", about = "Endorsement Management System core", version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an end-to-end demo scenario in-process
    Demo {
        /// Tumbling window length override, seconds
        #[arg(long, default_value_t = 2)]
        window_seconds: u64,
        /// Persist audit documents to a sled database at this path
        #[arg(long)]
        audit_db: Option<PathBuf>,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ems_config::load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Demo {
            window_seconds,
            audit_db,
        } => run_demo(config, window_seconds, audit_db).await,
    }
}

async fn run_demo(
    mut config: EmsConfig,
    window_seconds: u64,
    audit_db: Option<PathBuf>,
) -> Result<()> {
    config.scheduler.window_seconds = window_seconds;
    config.scheduler.sweep_interval_seconds = 1;
    if config.insurer.gateways.is_empty() {
        // Without a configured insurer endpoint every dispatch is a
        // technical failure; dead-letter immediately instead of pacing
        // through minutes of backoff.
        println!("no insurer gateways configured; dispatches will dead-letter");
        config.insurer.max_retries = 0;
    }

    let clock: Arc<dyn Clock> = Arc::new(SysClock);
    let runtime = match audit_db {
        Some(path) => {
            let documents = SledDocumentStore::open(&path)
                .with_context(|| format!("opening audit store at {}", path.display()))?;
            EmsRuntime::start_with_documents(config, clock, Arc::new(documents))
        }
        None => EmsRuntime::start(config, clock),
    };

    let employer_id = runtime
        .datastore
        .insert_employer(Employer::new("Acme Corp", Decimal::new(50000, 2)));
    println!("employer {employer_id} created with balance 500.00");

    let submissions = [
        (EndorsementType::Addition, "e-add-1", "300.00"),
        (EndorsementType::Addition, "e-add-2", "400.00"),
        (EndorsementType::Deletion, "e-del-1", "500.00"),
        (EndorsementType::Modification, "e-mod-1", "100.00"),
    ];
    for (request_type, employee, amount) in submissions {
        let request = runtime
            .ingestion
            .submit(NewEndorsement {
                employer_id: employer_id.clone(),
                request_type,
                payload: serde_json::json!({
                    "employee_id": employee,
                    "coverage": {"insurer_id": "AETNA_01", "amount": amount}
                }),
                effective_date: chrono_today(),
                trace_id: Some(format!("demo-{employee}")),
            })
            .await?;
        println!("submitted {} {} as {}", request.request_type, employee, request.id);
    }

    // Identical resubmission trips the dedup guard
    let duplicate = runtime
        .ingestion
        .submit(NewEndorsement {
            employer_id: employer_id.clone(),
            request_type: EndorsementType::Addition,
            payload: serde_json::json!({
                "employee_id": "e-add-1",
                "coverage": {"insurer_id": "AETNA_01", "amount": "300.00"}
            }),
            effective_date: chrono_today(),
            trace_id: None,
        })
        .await;
    println!("duplicate submission rejected: {}", duplicate.is_err());

    println!("waiting for the {window_seconds}s window to close...");
    tokio::time::sleep(Duration::from_secs(window_seconds + 2)).await;

    let employer = runtime.datastore.get_employer(&employer_id).await?;
    println!("ea_balance after window: {}", employer.ea_balance);
    println!(
        "ledger reconciles: {}",
        runtime.datastore.reconciled_balance(&employer_id) == employer.ea_balance
    );

    for row in runtime.datastore.endorsements_by_employer(&employer_id) {
        println!("  {} {} -> {}", row.id, row.request_type, row.status);
    }
    for txn in runtime.datastore.ledger_rows(&employer_id) {
        println!(
            "  ledger {} {} {} {}",
            txn.id,
            txn.txn_type.as_str(),
            txn.amount,
            txn.status.as_str()
        );
    }

    let audits = runtime.documents.find_all(AUDIT_COLLECTION).await?;
    println!("audit documents written: {}", audits.len());

    runtime.shutdown();
    Ok(())
}

fn chrono_today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}
