use rocket::serde::json::Json;
use rocket::{State, post};
use rusqlite::Connection;

use super::StaffSession;
use super::realtime::seed_bundle;
use crate::db::{self, Db};
use crate::error::ChatError;
use crate::events::{self, EventBus, Topic};
use crate::models::*;
use crate::notify::{self, Notifier};
use crate::queues::QueueIndex;
use crate::rooms::{RoomStore, append_message};
use crate::sessions::SessionRegistry;
use crate::settings::SettingsCache;

/// Drop the visitor from both unclaimed queues once a staff is attached.
/// Emits the queue-clearing deltas to the org audience.
fn clear_unclaimed_queues(
    conn: &Connection,
    queues: &QueueIndex,
    events: &EventBus,
    org_id: &str,
    visitor: &Visitor,
    claimer: &Staff,
    claimer_sid: &str,
) {
    if queues.online_remove(org_id, &visitor.id).is_some() {
        events.publish_skip(
            Topic::Org(org_id.to_string()),
            events::STAFF_CLAIM_CHAT,
            serde_json::json!({"user": claimer, "visitor": visitor.id}),
            claimer_sid,
        );
    }
    if queues.offline_remove(conn, &visitor.id).unwrap_or(false) {
        events.publish(
            Topic::Org(org_id.to_string()),
            events::REMOVE_VISITOR_OFFLINE_CHAT,
            serde_json::json!({"visitor": visitor}),
        );
    }
}

/// When the last staff detaches, the visitor flows back into the proper
/// unclaimed queue and both sides learn nobody is left.
fn requeue_if_unstaffed(
    conn: &Connection,
    registry: &SessionRegistry,
    queues: &QueueIndex,
    events: &EventBus,
    org_id: &str,
    snap: &RoomSnapshot,
) {
    if !snap.staffs.is_empty() {
        return;
    }
    let visitor = &snap.visitor;
    events.publish(
        Topic::Room(visitor.id.clone()),
        events::NO_STAFF_LEFT,
        serde_json::json!({"visitor": visitor.id}),
    );
    if registry.is_visitor_online(&visitor.id) {
        let bundle = seed_bundle(conn, visitor, &snap.chat);
        queues.online_push(org_id, bundle.clone());
        events.publish(
            Topic::Org(org_id.to_string()),
            events::APPEND_UNCLAIMED_CHATS,
            serde_json::to_value(&bundle).unwrap_or_default(),
        );
    } else {
        let _ = queues.offline_push(conn, &visitor.id);
    }
}

fn load_visitor(conn: &Connection, visitor_id: &str) -> Result<Visitor, ChatError> {
    let visitor_id = visitor_id.trim();
    if visitor_id.is_empty() {
        return Err(ChatError::Validation("visitor".into()));
    }
    db::get_visitor(conn, visitor_id).ok_or_else(|| ChatError::Validation("visitor".into()))
}

/// An agent claims an unclaimed chat (or a high-up joins one directly).
#[post("/api/v1/realtime/staff_join", format = "json", data = "<body>")]
pub fn staff_join(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    settings: &State<SettingsCache>,
    session: StaffSession,
    body: Json<VisitorTargetPayload>,
) -> Json<Ack> {
    let staff = &session.staff;
    let current = settings.current();
    if current.allow_claiming_chat == 0 && staff.role_id == ROLE_AGENT {
        return Json(Ack::err("Claiming chats is currently disabled."));
    }

    let (visitor, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    let conn = db.conn();

    if snap.staffs.contains_key(&staff.id) {
        return Json(Ack::ok());
    }
    if snap.staffs.len() as i64 >= current.max_staffs_in_chat {
        if current.max_staffs_in_chat == 1 {
            return Json(Ack::err("This chat is already claimed."));
        }
        return Json(ChatError::CapacityExceeded.into());
    }

    if let Err(e) = db::add_subscription(&conn, &staff.id, &visitor.id) {
        return Json(ChatError::from(e).into());
    }
    snap.staffs.insert(
        staff.id.clone(),
        RoomStaff { staff: staff.clone(), sid: Some(session.sid.clone()) },
    );
    registry.join(&session.sid, Topic::Room(visitor.id.clone()));

    clear_unclaimed_queues(&conn, queues, events, &staff.org_id, &visitor, staff, &session.sid);

    let joined = append_message(
        &conn,
        &mut snap,
        MSG_TYPE_SYSTEM,
        Some(&staff.id),
        serde_json::json!({"content": "join room"}),
    );
    if let Err(e) = joined {
        return Json(e.into());
    }

    events.publish_skip(
        Topic::Room(visitor.id.clone()),
        events::STAFF_JOIN_ROOM,
        serde_json::json!({"user": staff}),
        &session.sid,
    );

    Json(Ack::ok_with(serde_json::json!({
        "room": snap.chat.clone(),
        "staffs": snap.staffs.values().map(|rs| rs.staff.clone()).collect::<Vec<_>>(),
    })))
}

#[post("/api/v1/realtime/staff_msg", format = "json", data = "<body>")]
pub fn staff_msg(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    session: StaffSession,
    body: Json<StaffMsgPayload>,
) -> Json<Ack> {
    let staff = &session.staff;
    if !body.content.is_object() {
        return Json(ChatError::Validation("content".into()).into());
    }

    let (visitor, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    if !snap.staffs.contains_key(&staff.id) {
        return Json(ChatError::PermissionDenied.into());
    }
    let conn = db.conn();

    let msg = match append_message(
        &conn,
        &mut snap,
        MSG_TYPE_USER,
        Some(&staff.id),
        body.content.clone(),
    ) {
        Ok(msg) => msg,
        Err(e) => return Json(e.into()),
    };
    // The visitor's last message has been answered.
    if let Err(e) = queues.unhandled_remove(&conn, &visitor.id) {
        return Json(e.into());
    }

    events.publish_skip(
        Topic::Room(visitor.id.clone()),
        events::STAFF_SEND,
        serde_json::json!({"user": staff, "content": body.content}),
        &session.sid,
    );
    events.publish_skip(
        Topic::Monitor(staff.org_id.clone()),
        events::NEW_STAFF_MSG_FOR_SUPERVISOR,
        serde_json::json!({"user": staff, "visitor": visitor.id, "content": body.content}),
        &session.sid,
    );

    if !registry.is_visitor_online(&visitor.id)
        && let Some(email) = &visitor.email
    {
        let _ = notifier.enqueue_email(
            &conn,
            email,
            notify::MAIL_NEW_STAFF_MSG_TO_VISITOR,
            "You have a new reply",
            &format!("{} replied to your chat.", staff.display_name),
        );
    }

    serde_json::to_value(&msg)
        .map(|v| Json(Ack::ok_with(v)))
        .unwrap_or_else(|e| Json(Ack::err(e.to_string())))
}

#[post("/api/v1/realtime/staff_leave_room", format = "json", data = "<body>")]
pub fn staff_leave_room(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    session: StaffSession,
    body: Json<VisitorTargetPayload>,
) -> Json<Ack> {
    let staff = &session.staff;
    let room = match rooms.get(body.visitor.trim()) {
        Ok(room) => room,
        Err(e) => return Json(e.into()),
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    if snap.staffs.remove(&staff.id).is_none() {
        return Json(Ack::ok());
    }
    let conn = db.conn();
    if let Err(e) = db::remove_subscription(&conn, &staff.id, &snap.visitor.id) {
        return Json(ChatError::from(e).into());
    }
    registry.leave(&session.sid, &Topic::Room(snap.visitor.id.clone()));

    let left = append_message(
        &conn,
        &mut snap,
        MSG_TYPE_SYSTEM,
        Some(&staff.id),
        serde_json::json!({"content": "leave room"}),
    );
    if let Err(e) = left {
        return Json(e.into());
    }

    events.publish_skip(
        Topic::Room(snap.visitor.id.clone()),
        events::STAFF_LEAVE,
        serde_json::json!({"user": staff}),
        &session.sid,
    );
    events.publish_skip(
        Topic::Monitor(staff.org_id.clone()),
        events::STAFF_LEAVE_CHAT_FOR_SUPERVISOR,
        serde_json::json!({"user": staff, "visitor": snap.visitor.id}),
        &session.sid,
    );

    requeue_if_unstaffed(&conn, registry, queues, events, &staff.org_id, &snap);
    Json(Ack::ok())
}

/// Supervisor/admin attaches another staff to a chat. Idempotent.
#[post("/api/v1/realtime/add_staff_to_chat", format = "json", data = "<body>")]
pub fn add_staff_to_chat(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    settings: &State<SettingsCache>,
    session: StaffSession,
    body: Json<SingleStaffPayload>,
) -> Json<Ack> {
    let actor = &session.staff;
    if !role_permits(actor.role_id, StaffAction::ManageStaffsInChat) {
        return Json(ChatError::PermissionDenied.into());
    }

    let (visitor, target, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        let target = match db::get_staff(&conn, body.staff.trim()) {
            Some(s) if !s.disabled => s,
            _ => return Json(ChatError::Validation("staff".into()).into()),
        };
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, target, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    if snap.staffs.contains_key(&target.id) {
        return Json(Ack::ok());
    }
    let current = settings.current();
    if snap.staffs.len() as i64 >= current.max_staffs_in_chat {
        return Json(ChatError::CapacityExceeded.into());
    }

    let conn = db.conn();
    if let Err(e) = db::add_subscription(&conn, &target.id, &visitor.id) {
        return Json(ChatError::from(e).into());
    }
    let target_sid = registry.staff_sid(&target.org_id, &target.id);
    snap.staffs.insert(
        target.id.clone(),
        RoomStaff { staff: target.clone(), sid: target_sid.clone() },
    );

    clear_unclaimed_queues(&conn, queues, events, &actor.org_id, &visitor, &target, &session.sid);

    let _ = notifier.notify_staff(
        &conn,
        &target.id,
        &serde_json::json!({"kind": "assigned_chat", "visitor": visitor.id}),
    );
    match &target_sid {
        Some(sid) => {
            registry.join(sid, Topic::Room(visitor.id.clone()));
            events.publish(
                Topic::Sid(sid.clone()),
                events::STAFF_BEING_ADDED_TO_CHAT,
                serde_json::json!({"visitor": &visitor, "by": actor.id}),
            );
        }
        None => {
            let _ = notifier.enqueue_email(
                &conn,
                &target.email,
                notify::MAIL_NEW_ASSIGNED_CHAT,
                "A chat is waiting for you",
                &format!("You were added to the chat with {}.", visitor.name),
            );
        }
    }

    let staffs: Vec<Staff> = snap.staffs.values().map(|rs| rs.staff.clone()).collect();
    let delta = serde_json::json!({"visitor": visitor.id, "staffs": staffs});
    events.publish(Topic::Room(visitor.id.clone()), events::STAFFS_IN_CHAT_CHANGED, delta.clone());
    events.publish(Topic::Monitor(actor.org_id.clone()), events::STAFFS_IN_CHAT_CHANGED, delta);

    Json(Ack::ok())
}

#[post("/api/v1/realtime/remove_staff_from_chat", format = "json", data = "<body>")]
pub fn remove_staff_from_chat(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    session: StaffSession,
    body: Json<SingleStaffPayload>,
) -> Json<Ack> {
    let actor = &session.staff;
    if !role_permits(actor.role_id, StaffAction::ManageStaffsInChat) {
        return Json(ChatError::PermissionDenied.into());
    }

    let (visitor, target, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        let target = match db::get_staff(&conn, body.staff.trim()) {
            Some(s) => s,
            None => return Json(ChatError::Validation("staff".into()).into()),
        };
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, target, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    let conn = db.conn();
    let was_member = snap.staffs.remove(&target.id).is_some();
    if let Err(e) = db::remove_subscription(&conn, &target.id, &visitor.id) {
        return Json(ChatError::from(e).into());
    }
    if !was_member {
        return Json(Ack::ok());
    }

    if let Some(target_sid) = registry.staff_sid(&target.org_id, &target.id) {
        registry.leave(&target_sid, &Topic::Room(visitor.id.clone()));
        events.publish(
            Topic::Sid(target_sid),
            events::STAFF_BEING_REMOVED_FROM_CHAT,
            serde_json::json!({"visitor": &visitor, "by": actor.id}),
        );
    } else {
        let _ = notifier.enqueue_email(
            &conn,
            &target.email,
            notify::MAIL_REMOVED_FROM_CHAT,
            "You were removed from a chat",
            &format!("You no longer serve the chat with {}.", visitor.name),
        );
    }

    let staffs: Vec<Staff> = snap.staffs.values().map(|rs| rs.staff.clone()).collect();
    let delta = serde_json::json!({"visitor": visitor.id, "staffs": staffs});
    events.publish(Topic::Room(visitor.id.clone()), events::STAFFS_IN_CHAT_CHANGED, delta.clone());
    events.publish(Topic::Monitor(actor.org_id.clone()), events::STAFFS_IN_CHAT_CHANGED, delta);

    requeue_if_unstaffed(&conn, registry, queues, events, &actor.org_id, &snap);
    Json(Ack::ok())
}

/// Replace the whole staff set of a chat. Set semantics; capacity enforced
/// on the incoming set.
#[post("/api/v1/realtime/update_staffs_in_chat", format = "json", data = "<body>")]
pub fn update_staffs_in_chat(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    settings: &State<SettingsCache>,
    session: StaffSession,
    body: Json<ReplaceStaffsPayload>,
) -> Json<Ack> {
    let actor = &session.staff;
    if !role_permits(actor.role_id, StaffAction::ManageStaffsInChat) {
        return Json(ChatError::PermissionDenied.into());
    }
    let current = settings.current();
    if body.staffs.len() as i64 > current.max_staffs_in_chat {
        return Json(ChatError::CapacityExceeded.into());
    }

    let (visitor, incoming, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        let mut incoming = Vec::new();
        for staff_id in &body.staffs {
            match db::get_staff(&conn, staff_id.trim()) {
                Some(s) if !s.disabled => incoming.push(s),
                _ => return Json(ChatError::Validation("staffs".into()).into()),
            }
        }
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, incoming, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    let conn = db.conn();

    let removed: Vec<Staff> = snap
        .staffs
        .values()
        .map(|rs| rs.staff.clone())
        .filter(|s| !incoming.iter().any(|n| n.id == s.id))
        .collect();
    let added: Vec<Staff> = incoming
        .iter()
        .filter(|s| !snap.staffs.contains_key(&s.id))
        .cloned()
        .collect();

    for staff in &removed {
        if let Err(e) = db::remove_subscription(&conn, &staff.id, &visitor.id) {
            return Json(ChatError::from(e).into());
        }
        snap.staffs.remove(&staff.id);
        if let Some(sid) = registry.staff_sid(&staff.org_id, &staff.id) {
            registry.leave(&sid, &Topic::Room(visitor.id.clone()));
            events.publish(
                Topic::Sid(sid),
                events::STAFF_BEING_REMOVED_FROM_CHAT,
                serde_json::json!({"visitor": &visitor, "by": actor.id}),
            );
        } else {
            let _ = notifier.enqueue_email(
                &conn,
                &staff.email,
                notify::MAIL_REMOVED_FROM_CHAT,
                "You were removed from a chat",
                &format!("You no longer serve the chat with {}.", visitor.name),
            );
        }
    }
    for staff in &added {
        if let Err(e) = db::add_subscription(&conn, &staff.id, &visitor.id) {
            return Json(ChatError::from(e).into());
        }
        let sid = registry.staff_sid(&staff.org_id, &staff.id);
        snap.staffs.insert(
            staff.id.clone(),
            RoomStaff { staff: staff.clone(), sid: sid.clone() },
        );
        let _ = notifier.notify_staff(
            &conn,
            &staff.id,
            &serde_json::json!({"kind": "assigned_chat", "visitor": visitor.id}),
        );
        match sid {
            Some(sid) => {
                registry.join(&sid, Topic::Room(visitor.id.clone()));
                events.publish(
                    Topic::Sid(sid),
                    events::STAFF_BEING_ADDED_TO_CHAT,
                    serde_json::json!({"visitor": &visitor, "by": actor.id}),
                );
            }
            None => {
                let _ = notifier.enqueue_email(
                    &conn,
                    &staff.email,
                    notify::MAIL_NEW_ASSIGNED_CHAT,
                    "A chat is waiting for you",
                    &format!("You were added to the chat with {}.", visitor.name),
                );
            }
        }
    }

    if !snap.staffs.is_empty() {
        clear_unclaimed_queues(&conn, queues, events, &actor.org_id, &visitor, actor, &session.sid);
    }

    let staffs: Vec<Staff> = snap.staffs.values().map(|rs| rs.staff.clone()).collect();
    let delta = serde_json::json!({"visitor": visitor.id, "staffs": staffs});
    events.publish(Topic::Room(visitor.id.clone()), events::STAFFS_IN_CHAT_CHANGED, delta.clone());
    events.publish(Topic::Monitor(actor.org_id.clone()), events::STAFFS_IN_CHAT_CHANGED, delta);

    requeue_if_unstaffed(&conn, registry, queues, events, &actor.org_id, &snap);
    Json(Ack::ok())
}

/// Supervisor/admin takes a chat. One-to-one capacity replaces the holder;
/// larger rooms join as an extra staff. Both branches announce to the
/// monitor audience.
#[post("/api/v1/realtime/take_over_chat", format = "json", data = "<body>")]
pub fn take_over_chat(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    settings: &State<SettingsCache>,
    session: StaffSession,
    body: Json<VisitorTargetPayload>,
) -> Json<Ack> {
    let staff = &session.staff;
    if !role_permits(staff.role_id, StaffAction::TakeOverChat) {
        return Json(ChatError::PermissionDenied.into());
    }

    let (visitor, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    if snap.staffs.contains_key(&staff.id) {
        return Json(Ack::ok());
    }
    // A lower role never takes a chat from a higher one.
    if snap.staffs.values().any(|rs| rs.staff.role_id < staff.role_id) {
        return Json(ChatError::PermissionDenied.into());
    }
    let current = settings.current();
    let conn = db.conn();

    let one_to_one = current.max_staffs_in_chat == 1;
    if one_to_one {
        let removed: Vec<Staff> = snap.staffs.values().map(|rs| rs.staff.clone()).collect();
        snap.staffs.clear();
        if let Err(e) = db::remove_subscriptions_for_visitor(&conn, &visitor.id) {
            return Json(ChatError::from(e).into());
        }
        for old in &removed {
            if let Some(old_sid) = registry.staff_sid(&old.org_id, &old.id) {
                registry.leave(&old_sid, &Topic::Room(visitor.id.clone()));
                events.publish(
                    Topic::Sid(old_sid),
                    events::STAFF_BEING_TAKEN_OVER_CHAT,
                    serde_json::json!({"visitor": &visitor, "by": staff.id}),
                );
            }
        }
    } else if snap.staffs.len() as i64 >= current.max_staffs_in_chat {
        return Json(ChatError::CapacityExceeded.into());
    }

    if let Err(e) = db::add_subscription(&conn, &staff.id, &visitor.id) {
        return Json(ChatError::from(e).into());
    }
    snap.staffs.insert(
        staff.id.clone(),
        RoomStaff { staff: staff.clone(), sid: Some(session.sid.clone()) },
    );
    registry.join(&session.sid, Topic::Room(visitor.id.clone()));

    clear_unclaimed_queues(&conn, queues, events, &staff.org_id, &visitor, staff, &session.sid);

    let note = if one_to_one { "take over room" } else { "join room" };
    let system = append_message(
        &conn,
        &mut snap,
        MSG_TYPE_SYSTEM,
        Some(&staff.id),
        serde_json::json!({"content": note}),
    );
    if let Err(e) = system {
        return Json(e.into());
    }

    events.publish_skip(
        Topic::Room(visitor.id.clone()),
        events::STAFF_JOIN_ROOM,
        serde_json::json!({"user": staff}),
        &session.sid,
    );
    events.publish_skip(
        Topic::Monitor(staff.org_id.clone()),
        events::STAFF_TAKE_OVER_CHAT,
        serde_json::json!({"user": staff, "visitor": visitor.id}),
        &session.sid,
    );

    Json(Ack::ok())
}

/// Raise or clear a chat's severity; severity above zero flags the chat for
/// the monitor audience.
#[post("/api/v1/realtime/change_chat_priority", format = "json", data = "<body>")]
pub fn change_chat_priority(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    session: StaffSession,
    body: Json<ChangePriorityPayload>,
) -> Json<Ack> {
    let staff = &session.staff;
    if body.severity_level < 0 {
        return Json(ChatError::Validation("severity_level".into()).into());
    }

    let (visitor, room) = {
        let conn = db.conn();
        let visitor = match load_visitor(&conn, &body.visitor) {
            Ok(v) => v,
            Err(e) => return Json(e.into()),
        };
        match rooms.get_or_create(&conn, registry, &visitor) {
            Ok(room) => (visitor, room),
            Err(e) => return Json(e.into()),
        }
    };

    let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
    let conn = db.conn();

    if let Err(e) = conn.execute(
        "UPDATE chats SET severity_level = ?1, updated_at = ?2 WHERE visitor_id = ?3",
        rusqlite::params![body.severity_level, db::now_rfc3339(), &visitor.id],
    ) {
        return Json(ChatError::from(e).into());
    }
    snap.severity_level = body.severity_level;
    snap.chat.severity_level = body.severity_level;

    let flag_message = body.flag_message.clone().unwrap_or_default();
    if body.severity_level > 0 {
        if let Err(e) = queues.flagged_push(&conn, &visitor.id, &flag_message) {
            return Json(e.into());
        }
        let _ = notifier.notify_high_ups(
            &conn,
            &staff.org_id,
            &serde_json::json!({
                "kind": "flagged_chat",
                "visitor": visitor.id,
                "severity_level": body.severity_level,
                "flag_message": flag_message,
                "by": staff.id,
            }),
        );
        for high_up in db::high_ups(&conn, &staff.org_id) {
            if !registry.is_staff_online(&high_up.org_id, &high_up.id) {
                let _ = notifier.enqueue_email(
                    &conn,
                    &high_up.email,
                    notify::MAIL_FLAGGED_CHAT,
                    "A chat was flagged",
                    &format!("{} flagged the chat with {}.", staff.display_name, visitor.name),
                );
            }
        }
    } else if let Err(e) = queues.flagged_remove(&conn, &visitor.id) {
        return Json(e.into());
    }

    events.publish_skip(
        Topic::Monitor(staff.org_id.clone()),
        events::CHAT_HAS_CHANGED_PRIORITY_FOR_SUPERVISOR,
        serde_json::json!({
            "user": staff,
            "visitor": visitor.id,
            "severity_level": body.severity_level,
            "flag_message": flag_message,
        }),
        &session.sid,
    );
    Json(Ack::ok())
}

/// Mark a chat's pending visitor messages as dealt with.
#[post("/api/v1/realtime/staff_handled_chat", format = "json", data = "<body>")]
pub fn staff_handled_chat(
    db: &State<Db>,
    queues: &State<QueueIndex>,
    events: &State<EventBus>,
    session: StaffSession,
    body: Json<VisitorTargetPayload>,
) -> Json<Ack> {
    let staff = &session.staff;
    let visitor_id = body.visitor.trim();
    if visitor_id.is_empty() {
        return Json(ChatError::Validation("visitor".into()).into());
    }
    let conn = db.conn();
    if let Err(e) = queues.unhandled_remove(&conn, visitor_id) {
        return Json(e.into());
    }
    events.publish_skip(
        Topic::Monitor(staff.org_id.clone()),
        events::STAFF_HANDLED_CHAT_FOR_SUPERVISOR,
        serde_json::json!({"user": staff, "visitor": visitor_id}),
        &session.sid,
    );
    Json(Ack::ok())
}
