//! Status command implementation.

use crate::settings::Settings;
use keenotes_storage::NoteStore;

/// Prints local sync state.
pub fn run(settings: &Settings, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = settings.open_store()?;
    let count = store.count()?;
    let sync_state = store.sync_state()?;

    match format {
        "json" => {
            let status = serde_json::json!({
                "data_dir": settings.data_dir,
                "server": settings.server(),
                "client_id": store.client_id(),
                "notes": count,
                "sync_state": sync_state,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        "text" => {
            println!("KeeNotes Status");
            println!("===============");
            println!("Data directory: {}", settings.data_dir.display());
            println!("Server:         {}", settings.server().unwrap_or("(not configured)"));
            println!("Client id:      {}", store.client_id());
            println!("Notes:          {count}");
            match sync_state {
                Some(state) => {
                    println!("Last sync id:   {}", state.last_sync_id);
                    println!("Last sync time: {}", state.last_sync_time);
                }
                None => println!("Last sync id:   (never synced)"),
            }
        }
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}
