// Route module decomposition: each protocol area in its own file.
// Shared request guards and the typing tracker live here; route functions
// in submodules.

mod chats;
mod realtime;
mod settings_routes;
mod staff_events;
mod system;
mod visitor_events;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use chats::{
    chat_messages, flagged_chats, mark_chat_seen, notifications_feed, notifications_read,
    unclaimed_chats,
};
pub use realtime::{
    connect, disconnect_request, event_stream, user_stop_typing_send, user_typing_send,
};
pub use settings_routes::{get_settings, set_staff_disabled, update_settings};
pub use staff_events::{
    add_staff_to_chat, change_chat_priority, remove_staff_from_chat, staff_handled_chat,
    staff_join, staff_leave_room, staff_msg, take_over_chat, update_staffs_in_chat,
};
pub use system::{health, not_found, stats, unauthorized};
pub use visitor_events::{visitor_first_msg, visitor_leave_room, visitor_msg, visitor_msg_unclaimed};

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use crate::auth::{Identity, TokenSecret, resolve_token};
use crate::db::Db;
use crate::models::{Staff, Visitor};
use crate::sessions::SessionRegistry;

// --- Shared request guards ---

fn bearer_token(req: &Request<'_>) -> Option<String> {
    req.headers()
        .get_one("Authorization")
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(String::from)
}

fn resolve_bearer(req: &Request<'_>) -> Option<Identity> {
    let token = bearer_token(req)?;
    let db = req.rocket().state::<Db>()?;
    let secret = req.rocket().state::<TokenSecret>()?;
    let conn = db.conn();
    resolve_token(&conn, secret, &token).ok()
}

/// Any authenticated party (connect, stream, plain REST reads).
pub struct BearerIdentity(pub Identity);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerIdentity {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve_bearer(req) {
            Some(identity) => Outcome::Success(BearerIdentity(identity)),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// Staff-only REST surface.
pub struct StaffBearer(pub Staff);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StaffBearer {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match resolve_bearer(req) {
            Some(Identity::Staff(staff)) => Outcome::Success(StaffBearer(staff)),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

fn live_session(req: &Request<'_>) -> Option<(String, Identity)> {
    let sid = req.headers().get_one("X-Session-Id")?.to_string();
    let registry = req.rocket().state::<SessionRegistry>()?;
    let session = registry.get(&sid)?;
    let identity = resolve_bearer(req)?;
    // The bearer must be the party the session was bound to.
    if session.identity.id() != identity.id() {
        return None;
    }
    registry.touch(&sid);
    Some((sid, session.identity))
}

/// A live visitor connection: bearer + X-Session-Id bound to that visitor.
pub struct VisitorSession {
    pub sid: String,
    pub visitor: Visitor,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for VisitorSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match live_session(req) {
            Some((sid, Identity::Visitor(visitor))) => Outcome::Success(VisitorSession { sid, visitor }),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// A live staff connection.
pub struct StaffSession {
    pub sid: String,
    pub staff: Staff,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for StaffSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match live_session(req) {
            Some((sid, Identity::Staff(staff))) => Outcome::Success(StaffSession { sid, staff }),
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

/// A live connection of either kind.
pub struct AnySession {
    pub sid: String,
    pub identity: Identity,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AnySession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match live_session(req) {
            Some((sid, identity)) => Outcome::Success(AnySession { sid, identity }),
            None => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

// --- Typing Tracker ---

/// In-memory dedup: tracks the last typing relay per (visitor room, sender)
/// to avoid spam. Key: "visitor_id:sender_id", value: seconds since epoch.
pub struct TypingTracker {
    pub last_typing: StdMutex<HashMap<String, u64>>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self {
            last_typing: StdMutex::new(HashMap::new()),
        }
    }
}

impl TypingTracker {
    /// Returns false when the previous relay for this key was under 2s ago.
    pub fn should_relay(&self, visitor_id: &str, sender_id: &str) -> bool {
        let key = format!("{visitor_id}:{sender_id}");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut tracker = self.last_typing.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = tracker.get(&key)
            && now - last < 2
        {
            return false;
        }
        tracker.insert(key, now);
        // Prune old entries (>30s) to prevent memory growth
        tracker.retain(|_, &mut ts| now - ts < 30);
        true
    }
}
