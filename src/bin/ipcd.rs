// Entrypoint: wires Store, Supervisor, Bus, and JobService together behind
// the stdin/stdout NDJSON transport (spec.md §6). Task layout and the
// graceful-shutdown sequence are the teacher's `main.rs` verbatim in
// structure — channel setup, a dedicated stdout-writer task, a stdin-reader
// task, a `tokio::select!` over whichever of (explicit shutdown, stdin EOF,
// stdout pipe error) happens first, then an explicit teardown order — just
// pointed at `JobService`/`Bus` instead of the teacher's in-memory queue.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use hlsforge::env::{EngineConfig, EnvironmentContext, StaticHwInventory};
use hlsforge::ipc::protocol::Response;
use hlsforge::ipc::server;
use hlsforge::{Bus, JobService, Store, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let engine_cfg = EngineConfig::from_env();
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| format!("sqlite://{}/hlsforge.db", engine_cfg.data_path));

    let store = Arc::new(Store::connect(&database_url).await?);
    let bus = Arc::new(Bus::new());
    let env_ctx = EnvironmentContext::from_engine_config(&engine_cfg, Box::new(StaticHwInventory::assume_all_mapped()));
    let service_env_ctx = Arc::new(EnvironmentContext::from_engine_config(
        &engine_cfg,
        Box::new(StaticHwInventory::assume_all_mapped()),
    ));

    let supervisor = Arc::new(Supervisor::new(store.clone(), bus.clone(), engine_cfg.clone(), env_ctx));
    if let Err(e) = supervisor.reconcile_on_boot().await {
        tracing::error!(error = %e, "boot reconciliation failed");
    }

    let service = Arc::new(JobService::new(store.clone(), supervisor.clone(), service_env_ctx));

    // Response channel: every dispatched request and every forwarded bus
    // event lands here, and only `write_stdout` ever drains it.
    let (response_tx, response_rx) = mpsc::channel::<Response>(256);
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let stdout_handle = tokio::spawn(server::write_stdout(response_rx));
    let stdout_abort = stdout_handle.abort_handle();

    let stdin_handle = tokio::spawn(server::read_stdin(service, bus, response_tx.clone(), shutdown_tx));
    let stdin_abort = stdin_handle.abort_handle();

    tokio::select! {
        _ = shutdown_rx => {
            tracing::info!("shutdown request received");
        }
        result = stdin_handle => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "stdin reader task failed");
            }
        }
        result = stdout_handle => {
            match result {
                Ok(Err(e)) => tracing::warn!(error = %e, "stdout writer failed, shutting down"),
                Err(e) => tracing::warn!(error = %e, "stdout writer task failed"),
                Ok(Ok(())) => tracing::info!("stdout writer closed, shutting down"),
            }
        }
    }

    // Graceful teardown: stop reading new requests, drop this task's handle
    // to the response channel, give whatever's already queued a bounded
    // window to flush through the writer, then abort both tasks (a no-op if
    // they've already finished).
    stdin_abort.abort();
    drop(response_tx);

    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
    stdin_abort.abort();
    stdout_abort.abort();

    Ok(())
}
