use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db;
use crate::error::Result;
use crate::models::*;

/// The four per-organisation queues. Online-unclaimed is purely ephemeral
/// and insertion-ordered; the other three are backed by their durable tables
/// and FIFO by `created_at`.
#[derive(Clone)]
pub struct QueueIndex {
    online_unclaimed: Arc<Mutex<HashMap<String, Vec<UnclaimedBundle>>>>,
}

impl Default for QueueIndex {
    fn default() -> Self {
        QueueIndex {
            online_unclaimed: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl QueueIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // --- online-unclaimed ---

    /// Idempotent: a visitor already queued keeps their position and
    /// accumulated contents.
    pub fn online_push(&self, org_id: &str, bundle: UnclaimedBundle) {
        let mut map = self.online_unclaimed.lock().unwrap_or_else(|e| e.into_inner());
        let queue = map.entry(org_id.to_string()).or_default();
        if queue.iter().any(|b| b.visitor.id == bundle.visitor.id) {
            return;
        }
        queue.push(bundle);
    }

    /// Append a message to a queued visitor's bundle. Returns false if the
    /// visitor is not queued.
    pub fn online_append_content(&self, org_id: &str, visitor_id: &str, content: serde_json::Value) -> bool {
        let mut map = self.online_unclaimed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = map.get_mut(org_id)
            && let Some(bundle) = queue.iter_mut().find(|b| b.visitor.id == visitor_id)
        {
            bundle.contents.push(content);
            return true;
        }
        false
    }

    pub fn online_remove(&self, org_id: &str, visitor_id: &str) -> Option<UnclaimedBundle> {
        let mut map = self.online_unclaimed.lock().unwrap_or_else(|e| e.into_inner());
        let queue = map.get_mut(org_id)?;
        let index = queue.iter().position(|b| b.visitor.id == visitor_id)?;
        let bundle = queue.remove(index);
        if queue.is_empty() {
            map.remove(org_id);
        }
        Some(bundle)
    }

    pub fn online_contains(&self, org_id: &str, visitor_id: &str) -> bool {
        let map = self.online_unclaimed.lock().unwrap_or_else(|e| e.into_inner());
        map.get(org_id)
            .map(|q| q.iter().any(|b| b.visitor.id == visitor_id))
            .unwrap_or(false)
    }

    pub fn online_list(&self, org_id: &str) -> Vec<UnclaimedBundle> {
        let map = self.online_unclaimed.lock().unwrap_or_else(|e| e.into_inner());
        map.get(org_id).cloned().unwrap_or_default()
    }

    // --- offline-unclaimed (ChatUnclaimed rows) ---

    pub fn offline_push(&self, conn: &Connection, visitor_id: &str) -> Result<bool> {
        Ok(db::unclaimed_push(conn, visitor_id)?)
    }

    pub fn offline_remove(&self, conn: &Connection, visitor_id: &str) -> Result<bool> {
        Ok(db::unclaimed_remove(conn, visitor_id)?)
    }

    pub fn offline_contains(&self, conn: &Connection, visitor_id: &str) -> bool {
        db::unclaimed_contains(conn, visitor_id)
    }

    pub fn offline_slice(&self, conn: &Connection, offset: i64, limit: i64) -> Vec<OfflineUnclaimedEntry> {
        db::unclaimed_slice(conn, offset, limit)
    }

    pub fn offline_head(&self, conn: &Connection, limit: i64) -> Vec<OfflineUnclaimedEntry> {
        db::unclaimed_slice(conn, 0, limit)
    }

    // --- unhandled (ChatUnhandled rows) ---

    pub fn unhandled_push(&self, conn: &Connection, visitor_id: &str) -> Result<bool> {
        Ok(db::unhandled_push(conn, visitor_id)?)
    }

    pub fn unhandled_remove(&self, conn: &Connection, visitor_id: &str) -> Result<bool> {
        Ok(db::unhandled_remove(conn, visitor_id)?)
    }

    pub fn unhandled_contains(&self, conn: &Connection, visitor_id: &str) -> bool {
        db::unhandled_contains(conn, visitor_id)
    }

    // --- flagged (ChatFlagged rows) ---

    pub fn flagged_push(&self, conn: &Connection, visitor_id: &str, flag_message: &str) -> Result<bool> {
        Ok(db::flagged_push(conn, visitor_id, flag_message)?)
    }

    pub fn flagged_remove(&self, conn: &Connection, visitor_id: &str) -> Result<bool> {
        Ok(db::flagged_remove(conn, visitor_id)?)
    }

    pub fn flagged_contains(&self, conn: &Connection, visitor_id: &str) -> bool {
        db::flagged_contains(conn, visitor_id)
    }

    pub fn flagged_slice(&self, conn: &Connection, offset: i64, limit: i64) -> Vec<FlaggedEntry> {
        db::flagged_slice(conn, offset, limit)
    }
}
