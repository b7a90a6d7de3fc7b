//! KeeNotes CLI
//!
//! Command-line client for KeeNotes.
//!
//! # Commands
//!
//! - `post` - Encrypt and submit a note
//! - `sync` - Fetch new notes from the server
//! - `list` - Show recent local notes
//! - `search` - Search local notes
//! - `status` - Show local sync state
//! - `reset` - Forget the sync watermark
//! - `wipe` - Delete all local notes
//! - `compact` - Rewrite the local note log

mod commands;
mod settings;

use clap::{Parser, Subcommand};
use settings::{FlagSettings, Settings};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// KeeNotes end-to-end encrypted notes.
#[derive(Parser)]
#[command(name = "keenotes")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server base URL
    #[arg(global = true, long, env = "KEENOTES_SERVER")]
    server: Option<String>,

    /// API token
    #[arg(global = true, long, env = "KEENOTES_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Encryption password
    #[arg(global = true, long, env = "KEENOTES_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Channel label for posted notes
    #[arg(global = true, long, env = "KEENOTES_CHANNEL")]
    channel: Option<String>,

    /// Directory holding the note log and keenotes.json
    #[arg(
        global = true,
        short,
        long,
        env = "KEENOTES_DATA_DIR",
        default_value = ".keenotes"
    )]
    data_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and submit a note
    Post {
        /// Note text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Fetch new notes from the server
    Sync {
        /// Stay connected for realtime updates until Ctrl-C
        #[arg(short, long)]
        follow: bool,

        /// Seconds to wait for the catch-up burst to finish
        #[arg(short, long, default_value = "60")]
        timeout: u64,
    },

    /// Show recent local notes
    List {
        /// Maximum number of notes
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Search local notes
    Search {
        /// Text to look for
        query: String,

        /// Maximum number of notes
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show local sync state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the sync watermark so the next sync fetches everything
    Reset,

    /// Delete all local notes
    Wipe {
        /// Keep the sync watermark
        #[arg(long)]
        keep_sync_state: bool,

        /// Confirm deletion
        #[arg(short, long)]
        yes: bool,
    },

    /// Rewrite the local note log as a single snapshot
    Compact,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::resolve(
        cli.data_dir,
        FlagSettings {
            server: cli.server,
            token: cli.token,
            password: cli.password,
            channel: cli.channel,
        },
    )?;

    match cli.command {
        Commands::Post { text } => commands::post::run(&settings, &text.join(" "))?,
        Commands::Sync { follow, timeout } => {
            commands::sync::run(&settings, follow, Duration::from_secs(timeout))?
        }
        Commands::List { limit, format } => commands::notes::list(&settings, limit, &format)?,
        Commands::Search {
            query,
            limit,
            format,
        } => commands::notes::search(&settings, &query, limit, &format)?,
        Commands::Status { format } => commands::status::run(&settings, &format)?,
        Commands::Reset => commands::maintenance::reset(&settings)?,
        Commands::Wipe {
            keep_sync_state,
            yes,
        } => commands::maintenance::wipe(&settings, keep_sync_state, yes)?,
        Commands::Compact => commands::maintenance::compact(&settings)?,
    }

    Ok(())
}
