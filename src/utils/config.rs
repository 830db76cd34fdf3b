use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{ConnectionInfo, EngineSettings};
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub connections: Vec<ConnectionInfo>,
    pub default_page_size: usize,
    pub statement_page_size: usize,
    pub fetch_batch_size: usize,
    pub cursor_idle_timeout_secs: u64,
    pub server_output_size: u32,
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            default_page_size: 50,
            statement_page_size: 500,
            fetch_batch_size: 500,
            cursor_idle_timeout_secs: 600,
            server_output_size: 1_000_000,
        }
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("sql_worksheet");
            path.push("config.json");
            path
        })
    }

    /// Saved configuration, or the defaults when there is none or it is unreadable.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::new(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                eprintln!("Warning: failed to read {}: {err}", path.display());
                return Self::new();
            }
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => config.sanitized(),
            Err(err) => {
                eprintln!("Warning: ignoring malformed {}: {err}", path.display());
                Self::new()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| Error::Config("no configuration directory on this platform".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                eprintln!("Warning: config persistence error: {err}");
                return Err(err.into());
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        if let Err(err) = fs::write(path, content) {
            eprintln!("Warning: config persistence error: {err}");
            return Err(err.into());
        }
        Ok(())
    }

    /// Zero sizes would make every page empty; they fall back to the defaults.
    fn sanitized(mut self) -> Self {
        let defaults = Self::new();
        if self.default_page_size == 0 {
            eprintln!("Warning: default_page_size must be positive; using {}", defaults.default_page_size);
            self.default_page_size = defaults.default_page_size;
        }
        if self.statement_page_size == 0 {
            eprintln!(
                "Warning: statement_page_size must be positive; using {}",
                defaults.statement_page_size
            );
            self.statement_page_size = defaults.statement_page_size;
        }
        if self.fetch_batch_size == 0 {
            eprintln!("Warning: fetch_batch_size must be positive; using {}", defaults.fetch_batch_size);
            self.fetch_batch_size = defaults.fetch_batch_size;
        }
        self
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            default_page_size: self.default_page_size,
            statement_page_size: self.statement_page_size,
            fetch_batch_size: self.fetch_batch_size,
            cursor_idle_timeout: Duration::from_secs(self.cursor_idle_timeout_secs),
            server_output_size: self.server_output_size,
        }
    }

    /// Adds or replaces the connection with the same name.
    pub fn upsert_connection(&mut self, info: ConnectionInfo) {
        match self.connections.iter_mut().find(|c| c.name == info.name) {
            Some(existing) => *existing = info,
            None => self.connections.push(info),
        }
    }

    pub fn get_connection_by_name(&self, name: &str) -> Option<&ConnectionInfo> {
        self.connections.iter().find(|c| c.name == name)
    }

    pub fn remove_connection(&mut self, name: &str) {
        self.connections.retain(|c| c.name != name);
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}
