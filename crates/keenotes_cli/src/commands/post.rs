//! Post command implementation.

use crate::settings::Settings;
use keenotes_sync_engine::{NotePoster, ReqwestClient};

/// Encrypts and posts one note.
pub fn run(settings: &Settings, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.sync_config()?;
    let password = settings.require_password()?;
    let http = ReqwestClient::new(config.request_timeout)?;
    let poster = NotePoster::new(&config, http, password)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let id = runtime.block_on(poster.post(text))?;

    println!("✓ Posted note #{id}");
    Ok(())
}
