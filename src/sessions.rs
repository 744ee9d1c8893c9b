use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::auth::Identity;
use crate::error::{ChatError, Result};
use crate::events::Topic;
use crate::models::*;

/// One live connection.
#[derive(Clone)]
pub struct Session {
    pub sid: String,
    pub identity: Identity,
    pub org_id: Option<String>,
    pub topics: HashSet<Topic>,
    pub connected_at: String,
    pub last_seen: Instant,
}

impl Session {
    pub fn is_visitor(&self) -> bool {
        matches!(self.identity, Identity::Visitor(_))
    }
}

struct RegistryInner {
    sessions: HashMap<String, Session>,
    /// At most one live sid per visitor.
    visitor_sids: HashMap<String, String>,
    /// Newest sid per staff; older tabs stay live but leave the presence maps.
    online_staffs: HashMap<String, HashMap<String, OnlineStaffEntry>>,
    online_visitors: HashMap<String, OnlineVisitorEntry>,
}

/// Tracks every live connection: identity, joined topics, presence maps,
/// last-seen liveness.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                visitor_sids: HashMap::new(),
                online_staffs: HashMap::new(),
                online_visitors: HashMap::new(),
            })),
        }
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a visitor connection. A visitor may hold at most one live sid;
    /// a second connect is refused so the caller can answer
    /// `visitor_room_exists`.
    pub fn register_visitor(&self, visitor: &Visitor, room_id: &str) -> Result<String> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.visitor_sids.contains_key(&visitor.id) {
            return Err(ChatError::Conflict("A connection for this visitor".into()));
        }
        let sid = uuid::Uuid::new_v4().to_string();
        let mut topics = HashSet::new();
        topics.insert(Topic::Sid(sid.clone()));
        topics.insert(Topic::Room(visitor.id.clone()));
        inner.sessions.insert(
            sid.clone(),
            Session {
                sid: sid.clone(),
                identity: Identity::Visitor(visitor.clone()),
                org_id: None,
                topics,
                connected_at: chrono::Utc::now().to_rfc3339(),
                last_seen: Instant::now(),
            },
        );
        inner.visitor_sids.insert(visitor.id.clone(), sid.clone());
        inner.online_visitors.insert(
            visitor.id.clone(),
            OnlineVisitorEntry {
                visitor: visitor.clone(),
                room_id: room_id.to_string(),
            },
        );
        Ok(sid)
    }

    /// Bind a staff connection. Multi-tab is allowed; the newest sid replaces
    /// any older one in the presence maps.
    pub fn register_staff(&self, staff: &Staff, subscribed_visitors: &[String]) -> String {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let sid = uuid::Uuid::new_v4().to_string();
        let mut topics = HashSet::new();
        topics.insert(Topic::Sid(sid.clone()));
        topics.insert(Topic::Org(staff.org_id.clone()));
        if is_high_up(staff.role_id) {
            topics.insert(Topic::Monitor(staff.org_id.clone()));
        }
        for visitor_id in subscribed_visitors {
            topics.insert(Topic::Room(visitor_id.clone()));
        }
        inner.sessions.insert(
            sid.clone(),
            Session {
                sid: sid.clone(),
                identity: Identity::Staff(staff.clone()),
                org_id: Some(staff.org_id.clone()),
                topics,
                connected_at: chrono::Utc::now().to_rfc3339(),
                last_seen: Instant::now(),
            },
        );
        inner
            .online_staffs
            .entry(staff.org_id.clone())
            .or_default()
            .insert(
                staff.id.clone(),
                OnlineStaffEntry { staff: staff.clone(), sid: sid.clone() },
            );
        sid
    }

    /// Idempotent. Returns the unbound session so the caller can unwind
    /// rooms, queues, and presence fan-out.
    pub fn remove(&self, sid: &str) -> Option<Session> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let session = inner.sessions.remove(sid)?;
        match &session.identity {
            Identity::Visitor(v) => {
                if inner.visitor_sids.get(&v.id).map(String::as_str) == Some(sid) {
                    inner.visitor_sids.remove(&v.id);
                    inner.online_visitors.remove(&v.id);
                }
            }
            Identity::Staff(s) => {
                // Only the presence-holding sid clears the map entry.
                if let Some(org) = inner.online_staffs.get_mut(&s.org_id)
                    && org.get(&s.id).map(|e| e.sid.as_str()) == Some(sid)
                {
                    org.remove(&s.id);
                    if org.is_empty() {
                        inner.online_staffs.remove(&s.org_id);
                    }
                }
            }
        }
        Some(session)
    }

    pub fn get(&self, sid: &str) -> Option<Session> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.sessions.get(sid).cloned()
    }

    pub fn touch(&self, sid: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = inner.sessions.get_mut(sid) {
            session.last_seen = Instant::now();
        }
    }

    pub fn join(&self, sid: &str, topic: Topic) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = inner.sessions.get_mut(sid) {
            session.topics.insert(topic);
        }
    }

    pub fn leave(&self, sid: &str, topic: &Topic) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = inner.sessions.get_mut(sid) {
            session.topics.remove(topic);
        }
    }

    pub fn is_member(&self, sid: &str, topic: &Topic) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .sessions
            .get(sid)
            .map(|s| s.topics.contains(topic))
            .unwrap_or(false)
    }

    pub fn visitor_sid(&self, visitor_id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.visitor_sids.get(visitor_id).cloned()
    }

    pub fn is_visitor_online(&self, visitor_id: &str) -> bool {
        self.visitor_sid(visitor_id).is_some()
    }

    /// The presence-holding sid for a staff, if any tab is connected.
    pub fn staff_sid(&self, org_id: &str, staff_id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .online_staffs
            .get(org_id)
            .and_then(|m| m.get(staff_id))
            .map(|e| e.sid.clone())
    }

    pub fn is_staff_online(&self, org_id: &str, staff_id: &str) -> bool {
        self.staff_sid(org_id, staff_id).is_some()
    }

    pub fn online_staffs(&self, org_id: &str) -> Vec<OnlineStaffEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .online_staffs
            .get(org_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn online_visitors(&self) -> Vec<OnlineVisitorEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.online_visitors.values().cloned().collect()
    }

    /// Sessions idle beyond `max_idle`, for the liveness reaper.
    pub fn stale_sids(&self, max_idle: std::time::Duration) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        inner
            .sessions
            .values()
            .filter(|s| now.duration_since(s.last_seen) > max_idle)
            .map(|s| s.sid.clone())
            .collect()
    }

    #[cfg(test)]
    pub fn session_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.sessions.len()
    }
}

/// Unwind a session: presence maps, queue moves, room sid bookkeeping, and
/// the `*_goes_offline` fan-out. Idempotent; shared by the SSE drop guard,
/// the explicit `disconnect_request`, and the liveness reaper.
pub fn disconnect_session(
    db: &crate::db::Db,
    registry: &SessionRegistry,
    rooms: &crate::rooms::RoomStore,
    queues: &crate::queues::QueueIndex,
    events: &crate::events::EventBus,
    sid: &str,
) {
    use crate::events;

    let Some(session) = registry.remove(sid) else {
        return;
    };
    match &session.identity {
        Identity::Visitor(v) => {
            // Room lock is never taken while holding the connection.
            let unassigned = rooms.snapshot(&v.id).map(|s| s.staffs.is_empty());
            let org_id = {
                let conn = db.conn();
                let org_id = crate::db::first_org_id(&conn);
                let unassigned = unassigned
                    .unwrap_or_else(|| crate::db::subscribed_staffs(&conn, &v.id).is_empty());
                if unassigned
                    && let Some(org) = &org_id
                    && queues.online_remove(org, &v.id).is_some()
                {
                    let _ = queues.offline_push(&conn, &v.id);
                    events.publish(
                        Topic::Org(org.clone()),
                        events::UNCLAIMED_CHAT_TO_OFFLINE,
                        serde_json::json!({"visitor": v}),
                    );
                }
                org_id
            };
            events.publish(
                Topic::Room(v.id.clone()),
                events::VISITOR_GOES_OFFLINE,
                serde_json::json!({"visitor": v}),
            );
            if let Some(org) = &org_id {
                events.publish(
                    Topic::Monitor(org.clone()),
                    events::VISITOR_GOES_OFFLINE,
                    serde_json::json!({"visitor": v}),
                );
            }
            rooms.drop_if_abandoned(registry, &v.id);
        }
        Identity::Staff(s) => {
            for topic in &session.topics {
                if let Topic::Room(visitor_id) = topic {
                    if let Ok(room) = rooms.get(visitor_id) {
                        let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
                        if let Some(rs) = snap.staffs.get_mut(&s.id)
                            && rs.sid.as_deref() == Some(sid)
                        {
                            // Another tab may still hold presence.
                            rs.sid = registry.staff_sid(&s.org_id, &s.id);
                        }
                    }
                    rooms.drop_if_abandoned(registry, visitor_id);
                }
            }
            if !registry.is_staff_online(&s.org_id, &s.id) {
                events.publish(
                    Topic::Org(s.org_id.clone()),
                    events::STAFF_GOES_OFFLINE,
                    serde_json::json!({"staff": s}),
                );
            }
        }
    }
}
