//! Sync command implementation.

use crate::settings::Settings;
use keenotes_storage::NoteStore;
use keenotes_sync_engine::{SyncClient, SyncReconciler, SyncStatus, WebSocketConnector};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Connects, applies one catch-up burst, and disconnects.
///
/// With `follow`, stays connected for realtime updates until Ctrl-C.
pub fn run(
    settings: &Settings,
    follow: bool,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.sync_config()?;
    let store = Arc::new(settings.open_store()?);
    let reconciler = Arc::new(SyncReconciler::new(Arc::clone(&store)));
    match settings.password() {
        Some(password) => reconciler.set_password(Some(password)),
        None => warn!("no password given; encrypted notes are stored as received"),
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(async {
        let connector = WebSocketConnector::new(&config)?;
        let handle = SyncClient::spawn(config, connector, Arc::clone(&reconciler))?;
        handle.connect()?;

        let outcome = if follow {
            println!("Following realtime updates; press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)
        } else {
            wait_for_completion(&reconciler, timeout).await
        };

        let stats = handle.stats();
        handle.shutdown().await?;
        outcome?;
        Ok::<_, Box<dyn std::error::Error>>(stats)
    })?;

    println!("✓ Sync finished");
    println!("  Batches applied:   {}", stats.batches_applied);
    println!("  Notes applied:     {}", stats.notes_applied);
    println!("  Realtime updates:  {}", stats.realtime_applied);
    if stats.decrypt_failures > 0 {
        println!("  Decrypt failures:  {}", stats.decrypt_failures);
    }
    if let Some(error) = &stats.last_error {
        println!("  Last error:        {error}");
    }
    println!("  Last sync id:      {}", reconciler.last_sync_id()?);
    Ok(())
}

async fn wait_for_completion<S: NoteStore>(
    reconciler: &SyncReconciler<S>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let completed = tokio::time::timeout(timeout, async {
        while reconciler.status() != SyncStatus::Completed {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    completed.map_err(|_| format!("sync did not complete within {}s", timeout.as_secs()).into())
}
