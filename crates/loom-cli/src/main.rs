use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde_json::json;
use tracing::info;

use loom_core::app::{ClaimStats, ClaimerBuilder, LogSink, WorkerContext, WorkerGroup};
use loom_core::config::WorkerConfig;
use loom_core::domain::{ExecutionRecord, Plan, Step, Task, TaskId, TaskStatus};
use loom_core::impls::{GraphDependencyResolver, InMemoryTaskStore};

#[derive(Parser)]
#[command(name = "loom", about = "Claim and deduplicate pending tasks")]
struct Cli {
    /// Path to the worker config (TOML). Missing file means defaults.
    #[arg(long, default_value = "loom.toml")]
    config: PathBuf,

    /// Override the number of workers from the config file
    #[arg(long)]
    workers: Option<usize>,

    /// Stop after this many milliseconds instead of waiting for Ctrl-C
    #[arg(long)]
    run_for_ms: Option<u64>,
}

/// Seeds a small billing workflow: one finished upstream step and a handful
/// of charge tasks, one already expired and one already executed.
fn seed(store: &InMemoryTaskStore) -> anyhow::Result<()> {
    let mut fetch = Task::pending(TaskId::new(1), "billing:fetch")
        .with_input(json!({"period": "2024-06"}));
    fetch.status = TaskStatus::Succeeded;
    fetch.output = Some(json!({"invoice": "inv-7"}));
    store.insert_task(fetch)?;

    let dedup = Step::with_deduplication(
        "{customer: .input.customer, invoice: .dependencies.fetch.output.invoice}",
    );
    let customers = ["c-1", "c-2", "c-3", "c-2"];
    for (i, customer) in customers.iter().enumerate() {
        let id = TaskId::new(i as i64 + 2);
        store.insert_task(
            Task::pending(id, "billing:charge")
                .with_step(dedup.clone())
                .with_input(json!({"customer": customer}))
                .with_dependency(TaskId::new(1)),
        )?;
    }

    store.insert_task(
        Task::pending(TaskId::new(10), "billing:notify")
            .with_plan(Plan::until(Utc::now() - chrono::Duration::minutes(5))),
    )?;

    store.record_execution(ExecutionRecord::new(
        "billing",
        "charge",
        r#"{"customer":"c-1","invoice":"inv-7"}"#,
    ))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = WorkerConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    let store = InMemoryTaskStore::new();
    seed(&store)?;

    let claimer = ClaimerBuilder::new()
        .resolver(Arc::new(GraphDependencyResolver::new(store.clone())))
        .build()?;
    let stats = Arc::new(ClaimStats::new());
    let ctx = WorkerContext {
        scope: Arc::new(store.clone()),
        claimer,
        sink: Arc::new(LogSink),
        stats: Arc::clone(&stats),
    };

    info!(workers = config.workers, "starting worker group");
    let group = WorkerGroup::spawn(ctx, &config);

    match cli.run_for_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?,
    }

    info!("shutting down");
    group.shutdown_and_join().await;

    let summary = json!({
        "claims": stats.snapshot(),
        "tasks": store.counts_by_status()?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
