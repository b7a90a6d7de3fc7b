//! Reset, wipe and compact commands.

use crate::settings::Settings;
use keenotes_storage::NoteStore;

/// Clears the watermark so the next sync fetches everything again.
pub fn reset(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = settings.open_store()?;
    store.reset_sync_state()?;
    println!("✓ Sync state reset; the next sync starts from the beginning");
    Ok(())
}

/// Deletes every local note.
pub fn wipe(
    settings: &Settings,
    keep_sync_state: bool,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !yes {
        return Err("Refusing to delete notes without --yes".into());
    }
    let store = settings.open_store()?;
    let count = store.count()?;
    store.delete_all(!keep_sync_state)?;
    println!("✓ Deleted {count} notes");
    if keep_sync_state {
        println!("  Sync state kept; deleted notes will not be fetched again");
    }
    Ok(())
}

/// Rewrites the note log as a single snapshot.
pub fn compact(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let path = settings.log_path();
    if !path.exists() {
        return Err(format!("No note log at {}", path.display()).into());
    }
    let before = std::fs::metadata(&path)?.len();
    let store = settings.open_store()?;
    store.compact()?;
    let after = std::fs::metadata(&path)?.len();

    println!("✓ Compacted {}", path.display());
    println!("  Size before: {before} bytes");
    println!("  Size after:  {after} bytes");
    Ok(())
}
