//! Settings resolution: flags and environment first, then `keenotes.json`.

use keenotes_crypto::Password;
use keenotes_storage::{FileBackend, LogStore, StorageResult};
use keenotes_sync_engine::SyncConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the optional settings file inside the data directory.
pub const SETTINGS_FILE: &str = "keenotes.json";

/// Name of the note log inside the data directory.
pub const LOG_FILE: &str = "notes.log";

/// Settings errors. All of them are refusals to act.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A required value was not given anywhere.
    #[error("missing {0}; pass --{1} or set KEENOTES_{2}")]
    Missing(&'static str, &'static str, &'static str),

    /// The settings file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("invalid {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Contents of `keenotes.json`. Every field is optional.
///
/// The password is never read from disk.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    /// Server base URL.
    pub server: Option<String>,
    /// API token.
    pub token: Option<String>,
    /// Channel label for posted notes.
    pub channel: Option<String>,
    /// Reconnect delay in seconds.
    pub reconnect_delay_secs: Option<u64>,
}

impl FileSettings {
    /// Loads `keenotes.json` from `data_dir`, or defaults if it does not exist.
    pub fn load(data_dir: &Path) -> Result<Self, SettingsError> {
        let path = data_dir.join(SETTINGS_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(SettingsError::Read { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse { path, source })
    }
}

/// Values given on the command line or through `KEENOTES_*` variables.
#[derive(Debug, Default, Clone)]
pub struct FlagSettings {
    /// `--server`.
    pub server: Option<String>,
    /// `--token`.
    pub token: Option<String>,
    /// `--password`.
    pub password: Option<String>,
    /// `--channel`.
    pub channel: Option<String>,
}

/// Fully resolved settings.
#[derive(Debug)]
pub struct Settings {
    /// Data directory holding the note log and settings file.
    pub data_dir: PathBuf,
    server: Option<String>,
    token: Option<String>,
    password: Option<Password>,
    channel: Option<String>,
    reconnect_delay: Option<Duration>,
}

impl Settings {
    /// Merges flags over the settings file.
    pub fn resolve(data_dir: PathBuf, flags: FlagSettings) -> Result<Self, SettingsError> {
        let file = FileSettings::load(&data_dir)?;
        Ok(Self {
            data_dir,
            server: non_empty(flags.server).or(non_empty(file.server)),
            token: non_empty(flags.token).or(non_empty(file.token)),
            password: non_empty(flags.password).map(Password::new),
            channel: non_empty(flags.channel).or(non_empty(file.channel)),
            reconnect_delay: file.reconnect_delay_secs.map(Duration::from_secs),
        })
    }

    /// Path of the note log.
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    /// Opens the local note store.
    pub fn open_store(&self) -> StorageResult<LogStore<FileBackend>> {
        LogStore::open(&self.log_path())
    }

    /// Returns the configured server, if any.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// Returns the password, if one was given.
    pub fn password(&self) -> Option<Password> {
        self.password.clone()
    }

    /// Returns the password or refuses.
    pub fn require_password(&self) -> Result<Password, SettingsError> {
        self.password
            .clone()
            .ok_or(SettingsError::Missing("encryption password", "password", "PASSWORD"))
    }

    /// Builds the sync configuration, refusing without server or token.
    pub fn sync_config(&self) -> Result<SyncConfig, SettingsError> {
        let server = self
            .server
            .as_deref()
            .ok_or(SettingsError::Missing("server endpoint", "server", "SERVER"))?;
        let token = self
            .token
            .as_deref()
            .ok_or(SettingsError::Missing("API token", "token", "TOKEN"))?;

        let mut config = SyncConfig::new(server).with_token(token);
        if let Some(channel) = &self.channel {
            config = config.with_channel(channel.as_str());
        }
        if let Some(delay) = self.reconnect_delay {
            config = config.with_reconnect_delay(delay);
        }
        Ok(config)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::resolve(dir.path().to_path_buf(), FlagSettings::default()).unwrap();
        assert!(settings.server().is_none());
        assert!(matches!(
            settings.sync_config(),
            Err(SettingsError::Missing("server endpoint", _, _))
        ));
        assert!(settings.require_password().is_err());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"server":"https://file.example","token":"file-token","channel":"phone","reconnect_delay_secs":2}"#,
        )
        .unwrap();

        let flags = FlagSettings {
            server: Some("https://flag.example".into()),
            token: Some(String::new()),
            ..FlagSettings::default()
        };
        let settings = Settings::resolve(dir.path().to_path_buf(), flags).unwrap();
        let config = settings.sync_config().unwrap();

        assert_eq!(config.ws_url, "wss://flag.example/ws");
        assert_eq!(config.token.as_deref(), Some("file-token"));
        assert_eq!(config.channel, "phone");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
    }

    #[test]
    fn unknown_keys_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), r#"{"password":"nope"}"#).unwrap();
        assert!(matches!(
            FileSettings::load(dir.path()),
            Err(SettingsError::Parse { .. })
        ));
    }
}
