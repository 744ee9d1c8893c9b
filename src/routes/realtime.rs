use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use tokio::time::{Duration, interval};

use super::{AnySession, BearerIdentity, TypingTracker};
use crate::assign::AssignmentEngine;
use crate::auth::Identity;
use crate::db::{self, Db};
use crate::events::{self, EventBus, Topic};
use crate::models::*;
use crate::notify::{self, Notifier};
use crate::queues::QueueIndex;
use crate::rooms::{BUNDLE_SEED_LIMIT, RoomStore};
use crate::sessions::{SessionRegistry, disconnect_session};
use crate::settings::SettingsCache;

/// Rebuild an online-unclaimed bundle for a visitor, reseeding `contents`
/// from the most recent persisted messages.
pub(super) fn seed_bundle(conn: &rusqlite::Connection, visitor: &Visitor, chat: &Chat) -> UnclaimedBundle {
    let contents = db::recent_messages(conn, &chat.id, BUNDLE_SEED_LIMIT)
        .into_iter()
        .filter(|m| m.sender_staff_id.is_none() && m.type_id == MSG_TYPE_USER)
        .map(|m| m.content)
        .collect();
    UnclaimedBundle {
        visitor: visitor.clone(),
        room: chat.clone(),
        contents,
    }
}

#[post("/api/v1/realtime/connect")]
pub fn connect(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    assign: &State<AssignmentEngine>,
    notifier: &State<Notifier>,
    settings: &State<SettingsCache>,
    auth: BearerIdentity,
) -> Json<Ack> {
    match auth.0 {
        Identity::Visitor(visitor) => Json(connect_visitor(
            db, registry, rooms, queues, events, assign, notifier, settings, visitor,
        )),
        Identity::Staff(staff) => Json(connect_staff(db, registry, rooms, queues, events, staff)),
    }
}

#[allow(clippy::too_many_arguments)]
fn connect_visitor(
    db: &Db,
    registry: &SessionRegistry,
    rooms: &RoomStore,
    queues: &QueueIndex,
    events: &EventBus,
    assign: &AssignmentEngine,
    notifier: &Notifier,
    settings: &SettingsCache,
    visitor: Visitor,
) -> Ack {
    let chat = {
        let conn = db.conn();
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => {
                drop(conn);
                let snap = room.lock().unwrap_or_else(|e| e.into_inner());
                snap.chat.clone()
            }
            Err(e) => return e.into(),
        }
    };

    let sid = match registry.register_visitor(&visitor, &chat.id) {
        Ok(sid) => sid,
        Err(_) => {
            return Ack::err_with(
                "A chat session for this visitor is already open.",
                serde_json::json!({"event": events::VISITOR_ROOM_EXISTS, "room": chat}),
            );
        }
    };

    // DB-side work, released before any room lock is taken.
    let current = settings.current();
    let (org_id, mut staffs, was_offline_queued, bundle, assigned) = {
        let conn = db.conn();
        let org_id = db::first_org_id(&conn);
        let mut staffs = db::subscribed_staffs(&conn, &visitor.id);
        let mut was_offline_queued = false;
        let mut bundle = None;
        let mut assigned: Option<Staff> = None;

        if staffs.is_empty() && current.auto_assign == 1 {
            match assign.assign(&conn, &current, &visitor.id, &[], None) {
                Ok(Some(staff)) => {
                    if !registry.is_staff_online(&staff.org_id, &staff.id) {
                        let _ = notifier.enqueue_email(
                            &conn,
                            &staff.email,
                            notify::MAIL_NEW_ASSIGNED_CHAT,
                            "A chat is waiting for you",
                            &format!("Visitor {} has been assigned to you.", visitor.name),
                        );
                    }
                    staffs.push(staff.clone());
                    assigned = Some(staff);
                }
                Ok(None) => {}
                Err(e) => eprintln!("⚠️ Connect: auto-assign failed for {}: {e}", visitor.id),
            }
        }
        if staffs.is_empty() {
            was_offline_queued = queues.offline_remove(&conn, &visitor.id).unwrap_or(false);
            if was_offline_queued {
                bundle = Some(seed_bundle(&conn, &visitor, &chat));
            }
        }
        (org_id, staffs, was_offline_queued, bundle, assigned)
    };

    // Sync the live room with whatever assignment produced.
    if let Some(staff) = &assigned
        && let Ok(room) = rooms.get(&visitor.id)
    {
        let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
        let staff_sid = registry.staff_sid(&staff.org_id, &staff.id);
        snap.staffs.insert(
            staff.id.clone(),
            RoomStaff { staff: staff.clone(), sid: staff_sid },
        );
    }
    // Every subscribed staff with a live tab re-enters the room topic.
    for staff in &staffs {
        if let Some(staff_sid) = registry.staff_sid(&staff.org_id, &staff.id) {
            registry.join(&staff_sid, Topic::Room(visitor.id.clone()));
        }
    }
    if let Some(staff) = &assigned
        && let Some(staff_sid) = registry.staff_sid(&staff.org_id, &staff.id)
    {
        events.publish(
            Topic::Sid(staff_sid),
            events::AGENT_NEW_CHAT,
            serde_json::json!({"visitor": &visitor, "room": &chat}),
        );
    }

    if let Some(org) = &org_id {
        if was_offline_queued
            && let Some(bundle) = bundle
        {
            events.publish(
                Topic::Org(org.clone()),
                events::REMOVE_VISITOR_OFFLINE_CHAT,
                serde_json::json!({"visitor": &visitor}),
            );
            queues.online_push(org, bundle.clone());
            events.publish(
                Topic::Org(org.clone()),
                events::APPEND_UNCLAIMED_CHATS,
                serde_json::to_value(&bundle).unwrap_or_default(),
            );
        }
        events.publish(
            Topic::Monitor(org.clone()),
            events::VISITOR_GOES_ONLINE,
            serde_json::json!({"visitor": &visitor}),
        );
    }
    events.publish_skip(
        Topic::Room(visitor.id.clone()),
        events::VISITOR_GOES_ONLINE,
        serde_json::json!({"visitor": &visitor}),
        &sid,
    );

    let org_ref = org_id.as_deref().unwrap_or("");
    let init = VisitorInit {
        sid,
        room: chat,
        staffs,
        online_staffs: registry.online_staffs(org_ref),
    };
    match serde_json::to_value(&init) {
        Ok(mut data) => {
            data["event"] = serde_json::json!(events::VISITOR_INIT);
            Ack::ok_with(data)
        }
        Err(e) => Ack::err(e.to_string()),
    }
}

fn connect_staff(
    db: &Db,
    registry: &SessionRegistry,
    rooms: &RoomStore,
    queues: &QueueIndex,
    events: &EventBus,
    staff: Staff,
) -> Ack {
    let (subscriptions, offline_unclaimed) = {
        let conn = db.conn();
        (
            db::subscribed_visitor_ids(&conn, &staff.id),
            queues.offline_head(&conn, 15),
        )
    };

    let sid = registry.register_staff(&staff, &subscriptions);

    // The newest tab holds presence inside every live room it serves.
    for visitor_id in &subscriptions {
        if let Ok(room) = rooms.get(visitor_id) {
            let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rs) = snap.staffs.get_mut(&staff.id) {
                rs.sid = Some(sid.clone());
            }
        }
    }

    events.publish_skip(
        Topic::Org(staff.org_id.clone()),
        events::STAFF_GOES_ONLINE,
        serde_json::json!({"staff": &staff}),
        &sid,
    );

    let init = StaffInit {
        sid,
        unclaimed_chats: queues.online_list(&staff.org_id),
        offline_unclaimed_chats: offline_unclaimed,
        online_users: registry.online_staffs(&staff.org_id),
        online_visitors: registry.online_visitors(),
    };
    match serde_json::to_value(&init) {
        Ok(mut data) => {
            data["event"] = serde_json::json!(events::STAFF_INIT);
            Ack::ok_with(data)
        }
        Err(e) => Ack::err(e.to_string()),
    }
}

/// RAII guard: dropping the SSE stream runs the full disconnect path.
struct DisconnectGuard {
    db: Db,
    registry: SessionRegistry,
    rooms: RoomStore,
    queues: QueueIndex,
    events: EventBus,
    sid: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        disconnect_session(
            &self.db,
            &self.registry,
            &self.rooms,
            &self.queues,
            &self.events,
            &self.sid,
        );
    }
}

/// The SSE downlink for a registered session. Every server-to-client event
/// for the session's topics is delivered here, in publication order per
/// room. Dropping the stream disconnects the session.
#[get("/api/v1/realtime/stream?<sid>")]
pub fn event_stream(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    auth: BearerIdentity,
    sid: String,
) -> EventStream![] {
    let bound = registry
        .get(&sid)
        .map(|s| s.identity.id() == auth.0.id())
        .unwrap_or(false);
    let guard = bound.then(|| DisconnectGuard {
        db: db.inner().clone(),
        registry: registry.inner().clone(),
        rooms: rooms.inner().clone(),
        queues: queues.inner().clone(),
        events: events.inner().clone(),
        sid: sid.clone(),
    });
    let registry = registry.inner().clone();
    let mut rx = events.subscribe();

    EventStream! {
        let guard = guard;
        if guard.is_none() {
            yield Event::json(&serde_json::json!({"error": "Authentication fails"})).event("error");
        } else {
            let _guard = guard;
            let mut heartbeat = interval(Duration::from_secs(15));
            loop {
                tokio::select! {
                    env = rx.recv() => {
                        match env {
                            Ok(env) => {
                                if env.skip_sid.as_deref() == Some(sid.as_str()) {
                                    continue;
                                }
                                if registry.is_member(&sid, &env.topic) {
                                    yield Event::json(&env.payload).event(env.name);
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                            // Lagged: a slow consumer misses events and must
                            // resync from REST reads; persistence is unaffected.
                            _ => {}
                        }
                    }
                    _ = heartbeat.tick() => {
                        registry.touch(&sid);
                        let now = chrono::Utc::now().to_rfc3339();
                        yield Event::json(&serde_json::json!({"time": now})).event("heartbeat");
                    }
                }
            }
        }
    }
}

#[post("/api/v1/realtime/disconnect_request")]
pub fn disconnect_request(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    session: AnySession,
) -> Json<Ack> {
    disconnect_session(db, registry, rooms, queues, events, &session.sid);
    Json(Ack::ok())
}

#[post("/api/v1/realtime/user_typing_send", format = "json", data = "<body>")]
pub fn user_typing_send(
    registry: &State<SessionRegistry>,
    events: &State<EventBus>,
    typing: &State<TypingTracker>,
    session: AnySession,
    body: Json<VisitorTargetPayload>,
) -> Json<Ack> {
    let visitor_id = body.visitor.trim();
    if visitor_id.is_empty() {
        return Json(Ack::err("Missing/Invalid field: visitor"));
    }
    if !registry.is_member(&session.sid, &Topic::Room(visitor_id.to_string())) {
        return Json(Ack::err("The chat room is either closed or doesn't exist."));
    }
    if typing.should_relay(visitor_id, session.identity.id()) {
        events.publish_skip(
            Topic::Room(visitor_id.to_string()),
            events::USER_TYPING_RECEIVE,
            serde_json::json!({"user": session.identity.id(), "visitor": visitor_id}),
            &session.sid,
        );
    }
    Json(Ack::ok())
}

#[post("/api/v1/realtime/user_stop_typing_send", format = "json", data = "<body>")]
pub fn user_stop_typing_send(
    registry: &State<SessionRegistry>,
    events: &State<EventBus>,
    session: AnySession,
    body: Json<VisitorTargetPayload>,
) -> Json<Ack> {
    let visitor_id = body.visitor.trim();
    if visitor_id.is_empty() {
        return Json(Ack::err("Missing/Invalid field: visitor"));
    }
    if !registry.is_member(&session.sid, &Topic::Room(visitor_id.to_string())) {
        return Json(Ack::err("The chat room is either closed or doesn't exist."));
    }
    events.publish_skip(
        Topic::Room(visitor_id.to_string()),
        events::USER_STOP_TYPING_RECEIVE,
        serde_json::json!({"user": session.identity.id(), "visitor": visitor_id}),
        &session.sid,
    );
    Json(Ack::ok())
}
