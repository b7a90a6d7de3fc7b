//! List and search commands.

use crate::settings::Settings;
use keenotes_storage::{Note, NoteStore};

/// Prints the most recent notes.
pub fn list(settings: &Settings, limit: usize, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = settings.open_store()?;
    let notes = store.list_recent(limit)?;
    print_notes(&notes, format)
}

/// Prints notes matching `query`.
pub fn search(
    settings: &Settings,
    query: &str,
    limit: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = settings.open_store()?;
    let notes = store.search(query, limit)?;
    if notes.is_empty() && format != "json" {
        println!("No notes match {query:?}");
        return Ok(());
    }
    print_notes(&notes, format)
}

fn print_notes(notes: &[Note], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(notes)?),
        "text" => {
            for note in notes {
                println!("#{} [{}] {}", note.id, note.channel, note.created_at);
                for line in note.content.lines() {
                    println!("    {line}");
                }
            }
        }
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}
