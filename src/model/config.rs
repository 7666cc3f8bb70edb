use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration from tsync.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_snapshot")]
    pub snapshot: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            snapshot: default_snapshot(),
        }
    }
}

fn default_snapshot() -> String {
    "tasks.json".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KanbanItems {
    /// Top-level tasks only
    #[default]
    Roots,
    /// Every task under an included root
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UiConfig {
    /// Colours handed out to assignees and projects, `#RRGGBB`
    #[serde(default)]
    pub palette: Vec<String>,
    /// Status name to `#RRGGBB`
    #[serde(default)]
    pub status_colors: HashMap<String, String>,
    #[serde(default)]
    pub kanban_items: KanbanItems,
}
