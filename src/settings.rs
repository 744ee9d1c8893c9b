use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::error::{ChatError, Result};

/// Global settings snapshot. Values live in the `settings` table; the cached
/// copy here is refreshed on every write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub login_type: i64,
    pub allow_claiming_chat: i64,
    pub max_staffs_in_chat: i64,
    pub auto_assign: i64,
    pub auto_reassign: i64,
    pub hours_to_auto_reassign: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            login_type: 0,
            allow_claiming_chat: 1,
            max_staffs_in_chat: 1,
            auto_assign: 1,
            auto_reassign: 1,
            hours_to_auto_reassign: 24,
        }
    }
}

pub const SETTING_KEYS: &[&str] = &[
    "login_type",
    "allow_claiming_chat",
    "max_staffs_in_chat",
    "auto_assign",
    "auto_reassign",
    "hours_to_auto_reassign",
];

impl Settings {
    pub fn load(conn: &Connection) -> Self {
        let mut settings = Settings::default();
        let mut stmt = match conn.prepare("SELECT key, value FROM settings") {
            Ok(s) => s,
            Err(_) => return settings,
        };
        let rows: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default();
        for (key, value) in rows {
            settings.apply(&key, value);
        }
        settings
    }

    fn apply(&mut self, key: &str, value: i64) {
        match key {
            "login_type" => self.login_type = value,
            "allow_claiming_chat" => self.allow_claiming_chat = value,
            "max_staffs_in_chat" => self.max_staffs_in_chat = value,
            "auto_assign" => self.auto_assign = value,
            "auto_reassign" => self.auto_reassign = value,
            "hours_to_auto_reassign" => self.hours_to_auto_reassign = value,
            _ => {}
        }
    }
}

pub struct SettingsCache {
    inner: RwLock<Settings>,
}

impl SettingsCache {
    pub fn new(conn: &Connection) -> Self {
        SettingsCache {
            inner: RwLock::new(Settings::load(conn)),
        }
    }

    pub fn current(&self) -> Settings {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Write validated keys to the settings table, then refresh the cache
    /// from what the table now holds.
    pub fn update(&self, conn: &Connection, changes: &serde_json::Map<String, serde_json::Value>) -> Result<Settings> {
        for (key, value) in changes {
            if !SETTING_KEYS.contains(&key.as_str()) {
                return Err(ChatError::Validation(key.clone()));
            }
            let value = value.as_i64().ok_or_else(|| ChatError::Validation(key.clone()))?;
            if key == "max_staffs_in_chat" && value < 1 {
                return Err(ChatError::Validation(key.clone()));
            }
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        let refreshed = Settings::load(conn);
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = refreshed.clone();
        Ok(refreshed)
    }
}
