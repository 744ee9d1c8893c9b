use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db;
use crate::error::{ChatError, Result};
use crate::models::*;
use crate::sessions::SessionRegistry;

/// How many times an append retries after a duplicate-sequence conflict.
const SEQUENCE_RETRY_LIMIT: usize = 3;

/// Seed size for a re-materialized unclaimed bundle's contents.
pub const BUNDLE_SEED_LIMIT: i64 = 50;

/// Single source of truth for live room state. All mutations for a room
/// serialize through its per-visitor mutex; callers hold that lock until the
/// resulting events have been published.
#[derive(Clone)]
pub struct RoomStore {
    rooms: Arc<Mutex<HashMap<String, Arc<Mutex<RoomSnapshot>>>>>,
}

impl Default for RoomStore {
    fn default() -> Self {
        RoomStore {
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the live record, materializing it from the persisted Chat and
    /// message log when absent. The recovered `sequence_num` always exceeds
    /// the max persisted one.
    pub fn get_or_create(
        &self,
        conn: &Connection,
        registry: &SessionRegistry,
        visitor: &Visitor,
    ) -> Result<Arc<Mutex<RoomSnapshot>>> {
        {
            let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(room) = rooms.get(&visitor.id) {
                return Ok(room.clone());
            }
        }

        let chat = db::get_or_create_chat(conn, &visitor.id)?;
        let sequence_num = db::max_sequence_num(conn, &chat.id) + 1;
        let mut staffs = HashMap::new();
        for staff in db::subscribed_staffs(conn, &visitor.id) {
            let sid = registry.staff_sid(&staff.org_id, &staff.id);
            staffs.insert(staff.id.clone(), RoomStaff { staff, sid });
        }
        let snapshot = RoomSnapshot {
            severity_level: chat.severity_level,
            chat,
            visitor: visitor.clone(),
            sequence_num,
            staffs,
        };

        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        // A racing materializer may have beaten us; keep the first one.
        let room = rooms
            .entry(visitor.id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(snapshot)))
            .clone();
        Ok(room)
    }

    /// The live record, or RoomClosed. Callers either re-materialize via
    /// `get_or_create` or surface the error.
    pub fn get(&self, visitor_id: &str) -> Result<Arc<Mutex<RoomSnapshot>>> {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.get(visitor_id).cloned().ok_or(ChatError::RoomClosed)
    }

    pub fn snapshot(&self, visitor_id: &str) -> Option<RoomSnapshot> {
        let room = self.get(visitor_id).ok()?;
        let snap = room.lock().unwrap_or_else(|e| e.into_inner());
        Some(snap.clone())
    }

    pub fn contains(&self, visitor_id: &str) -> bool {
        let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.contains_key(visitor_id)
    }

    /// Delete the ephemeral record. Used when the visitor closes the chat.
    pub fn remove(&self, visitor_id: &str) {
        let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
        rooms.remove(visitor_id);
    }

    /// Delete the ephemeral record iff the visitor is offline and no
    /// subscribed staff has a live connection. Returns true if dropped.
    /// The map lock and the room lock are never held together.
    pub fn drop_if_abandoned(&self, registry: &SessionRegistry, visitor_id: &str) -> bool {
        let room = {
            let rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            match rooms.get(visitor_id) {
                Some(room) => room.clone(),
                None => return false,
            }
        };
        let abandoned = {
            let snap = room.lock().unwrap_or_else(|e| e.into_inner());
            !registry.is_visitor_online(visitor_id)
                && !snap
                    .staffs
                    .values()
                    .any(|rs| registry.is_staff_online(&rs.staff.org_id, &rs.staff.id))
        };
        if abandoned {
            let mut rooms = self.rooms.lock().unwrap_or_else(|e| e.into_inner());
            if rooms.get(visitor_id).is_some_and(|r| Arc::ptr_eq(r, &room)) {
                rooms.remove(visitor_id);
            }
        }
        abandoned
    }
}

/// Append a message under the room's lock, assigning the next sequence
/// number. On a duplicate-sequence conflict (state evicted plus a race) the
/// counter re-synchronizes from the persisted max and the insert retries.
pub fn append_message(
    conn: &Connection,
    snap: &mut RoomSnapshot,
    type_id: i64,
    sender_staff_id: Option<&str>,
    content: serde_json::Value,
) -> Result<ChatMessage> {
    let mut attempts = 0;
    loop {
        let msg = ChatMessage {
            id: db::generate_id(),
            chat_id: snap.chat.id.clone(),
            sequence_num: snap.sequence_num,
            type_id,
            sender_staff_id: sender_staff_id.map(String::from),
            content: content.clone(),
            created_at: db::now_rfc3339(),
        };
        match db::insert_message(conn, &msg) {
            Ok(()) => {
                snap.sequence_num = msg.sequence_num + 1;
                return Ok(msg);
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
                    && attempts < SEQUENCE_RETRY_LIMIT =>
            {
                attempts += 1;
                snap.sequence_num = db::max_sequence_num(conn, &snap.chat.id) + 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
