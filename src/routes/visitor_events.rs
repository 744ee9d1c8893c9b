use rocket::serde::json::Json;
use rocket::{State, post};

use super::VisitorSession;
use super::realtime::seed_bundle;
use crate::db::{self, Db};
use crate::error::ChatError;
use crate::events::{self, EventBus, Topic};
use crate::models::*;
use crate::notify::{self, Notifier};
use crate::queues::QueueIndex;
use crate::rooms::{RoomStore, append_message};
use crate::sessions::SessionRegistry;

fn validate_content(content: &serde_json::Value) -> Result<(), ChatError> {
    if !content.is_object() || content.as_object().is_some_and(|m| m.is_empty()) {
        return Err(ChatError::Validation("content".into()));
    }
    Ok(())
}

/// The visitor's opening message: persists through the sequencer and, when
/// nobody is assigned, bundles the visitor into the online-unclaimed queue.
#[post("/api/v1/realtime/visitor_first_msg", format = "json", data = "<content>")]
pub fn visitor_first_msg(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    session: VisitorSession,
    content: Json<serde_json::Value>,
) -> Json<Ack> {
    Json(visitor_message(
        db, registry, rooms, queues, events, notifier, &session, content.into_inner(),
    ))
}

/// Another message while the chat is still unclaimed.
#[post("/api/v1/realtime/visitor_msg_unclaimed", format = "json", data = "<content>")]
pub fn visitor_msg_unclaimed(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    session: VisitorSession,
    content: Json<serde_json::Value>,
) -> Json<Ack> {
    Json(visitor_message(
        db, registry, rooms, queues, events, notifier, &session, content.into_inner(),
    ))
}

/// A message inside a served chat.
#[post("/api/v1/realtime/visitor_msg", format = "json", data = "<content>")]
pub fn visitor_msg(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    session: VisitorSession,
    content: Json<serde_json::Value>,
) -> Json<Ack> {
    Json(visitor_message(
        db, registry, rooms, queues, events, notifier, &session, content.into_inner(),
    ))
}

/// Shared flow for the three `visitor_*_msg` events. The claimed/unclaimed
/// split is decided by live room state, not by which event name the client
/// picked; a stale client cannot corrupt the queues.
#[allow(clippy::too_many_arguments)]
fn visitor_message(
    db: &Db,
    registry: &SessionRegistry,
    rooms: &RoomStore,
    queues: &QueueIndex,
    events: &EventBus,
    notifier: &Notifier,
    session: &VisitorSession,
    content: serde_json::Value,
) -> Ack {
    if let Err(e) = validate_content(&content) {
        return e.into();
    }
    let visitor = &session.visitor;

    let room = {
        let conn = db.conn();
        match rooms.get_or_create(&conn, registry, visitor) {
            Ok(room) => room,
            Err(e) => return e.into(),
        }
    };

    // Per-room critical section: sequence, persist, queue sync, fan-out.
    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    let conn = db.conn();

    let msg = match append_message(&conn, &mut snap, MSG_TYPE_USER, None, content.clone()) {
        Ok(msg) => msg,
        Err(e) => return e.into(),
    };
    if let Err(e) = queues.unhandled_push(&conn, &visitor.id) {
        return e.into();
    }
    let org_id = db::first_org_id(&conn);

    if snap.staffs.is_empty() {
        // Unclaimed: accumulate into the org queue bundle.
        let Some(org) = org_id else {
            return ChatError::Storage("no organisation configured".into()).into();
        };
        if queues.online_contains(&org, &visitor.id) {
            queues.online_append_content(&org, &visitor.id, content.clone());
            events.publish(
                Topic::Org(org.clone()),
                events::VISITOR_UNCLAIMED_MSG,
                serde_json::json!({"user": visitor, "content": content}),
            );
        } else {
            let bundle = seed_bundle(&conn, visitor, &snap.chat);
            queues.online_push(&org, bundle.clone());
            events.publish(
                Topic::Org(org.clone()),
                events::APPEND_UNCLAIMED_CHATS,
                serde_json::to_value(&bundle).unwrap_or_default(),
            );
        }
    } else {
        events.publish_skip(
            Topic::Room(visitor.id.clone()),
            events::VISITOR_SEND,
            serde_json::json!({"user": visitor, "content": content}),
            &session.sid,
        );
        if let Some(org) = &org_id {
            events.publish(
                Topic::Monitor(org.clone()),
                events::NEW_VISITOR_MSG_FOR_SUPERVISOR,
                serde_json::json!({"user": visitor, "content": content}),
            );
        }
        // Away staffs get a rate-limited e-mail nudge.
        for rs in snap.staffs.values() {
            if !registry.is_staff_online(&rs.staff.org_id, &rs.staff.id) {
                let _ = notifier.enqueue_email(
                    &conn,
                    &rs.staff.email,
                    notify::MAIL_NEW_VISITOR_MSG_TO_STAFFS,
                    &format!("{} sent a new message", visitor.name),
                    "A visitor in one of your chats sent a message while you were away.",
                );
            }
        }
    }

    serde_json::to_value(&msg)
        .map(Ack::ok_with)
        .unwrap_or_else(|e| Ack::err(e.to_string()))
}

/// The visitor explicitly closes the chat. This is the only path that
/// closes a room; disconnects merely park it.
#[post("/api/v1/realtime/visitor_leave_room")]
pub fn visitor_leave_room(
    db: &State<Db>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    session: VisitorSession,
) -> Json<Ack> {
    let visitor = &session.visitor;
    let was_unassigned = rooms
        .snapshot(&visitor.id)
        .map(|s| s.staffs.is_empty())
        .unwrap_or(true);

    let org_id = {
        let conn = db.conn();
        let org_id = db::first_org_id(&conn);
        let _ = queues.offline_remove(&conn, &visitor.id);
        org_id
    };

    if let Some(org) = &org_id
        && was_unassigned
        && queues.online_remove(org, &visitor.id).is_some()
    {
        events.publish(
            Topic::Org(org.clone()),
            events::VISITOR_LEAVE_QUEUE,
            serde_json::json!({"visitor": visitor}),
        );
    }

    events.publish_skip(
        Topic::Room(visitor.id.clone()),
        events::VISITOR_LEAVE,
        serde_json::json!({"user": visitor}),
        &session.sid,
    );
    if let Some(org) = &org_id {
        events.publish(
            Topic::Monitor(org.clone()),
            events::VISITOR_LEAVE_CHAT_FOR_SUPERVISOR,
            serde_json::json!({"user": visitor}),
        );
    }

    rooms.remove(&visitor.id);
    Json(Ack::ok())
}
