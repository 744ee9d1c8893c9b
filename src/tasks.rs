use rusqlite::Connection;

use crate::assign::AssignmentEngine;
use crate::db::{self, Db};
use crate::error::Result;
use crate::events::{self, EventBus, Topic};
use crate::models::*;
use crate::notify::{self, Notifier};
use crate::queues::QueueIndex;
use crate::rooms::RoomStore;
use crate::sessions::{self, SessionRegistry};
use crate::settings::Settings;

/// Default interval between reassignment sweeps (seconds).
const REASSIGN_INTERVAL_SECS: u64 = 60 * 30;

/// How often the liveness reaper scans for idle sessions (seconds).
const REAPER_INTERVAL_SECS: u64 = 30;

/// Sessions silent beyond this many seconds are treated as disconnected.
const DEFAULT_SESSION_IDLE_SECS: u64 = 120;

/// Clones of the engine singletons, for handing to spawned background
/// tasks (every component shares its state through an inner Arc).
#[derive(Clone)]
pub struct EngineHandles {
    pub registry: SessionRegistry,
    pub rooms: RoomStore,
    pub queues: QueueIndex,
    pub assign: AssignmentEngine,
    pub events: EventBus,
    pub notifier: Notifier,
}

/// DB phase of a reassignment: drop the old subscriptions, pick a fresh
/// volunteer via round-robin, and queue the away-mail. Returns the new
/// holder and the prior set; never touches a room lock, so a caller may
/// run it while holding the shared connection.
#[allow(clippy::too_many_arguments)]
pub fn reassign_edges(
    conn: &Connection,
    registry: &SessionRegistry,
    queues: &QueueIndex,
    assign: &AssignmentEngine,
    events: &EventBus,
    notifier: &Notifier,
    settings: &Settings,
    visitor_id: &str,
) -> Result<Option<(Staff, Vec<Staff>)>> {
    let prior = db::subscribed_staffs(conn, visitor_id);
    let Some(staff) = assign.reassign(conn, settings, visitor_id)? else {
        return Ok(None);
    };
    // The chat is served now; it leaves both unclaimed queues.
    if queues.online_remove(&staff.org_id, visitor_id).is_some() {
        events.publish(
            Topic::Org(staff.org_id.clone()),
            events::STAFF_CLAIM_CHAT,
            serde_json::json!({"user": &staff, "visitor": visitor_id}),
        );
    }
    if queues.offline_remove(conn, visitor_id)? {
        events.publish(
            Topic::Org(staff.org_id.clone()),
            events::REMOVE_VISITOR_OFFLINE_CHAT,
            serde_json::json!({"visitor": visitor_id}),
        );
    }
    notifier.notify_staff(
        conn,
        &staff.id,
        &serde_json::json!({"kind": "assigned_chat", "visitor": visitor_id}),
    )?;
    if !registry.is_staff_online(&staff.org_id, &staff.id) {
        notifier.enqueue_email(
            conn,
            &staff.email,
            notify::MAIL_NEW_ASSIGNED_CHAT,
            "A chat is waiting for you",
            &format!("Visitor {visitor_id} has been assigned to you."),
        )?;
    }
    Ok(Some((staff, prior)))
}

/// Room phase of a reassignment: swap the live staff set, move the topic
/// memberships, and tell the new holder. Takes room locks, so the caller
/// must not hold the shared connection here.
pub fn sync_room_after_reassign(
    registry: &SessionRegistry,
    rooms: &RoomStore,
    events: &EventBus,
    visitor_id: &str,
    staff: &Staff,
    prior: &[Staff],
) {
    let sid = registry.staff_sid(&staff.org_id, &staff.id);
    if let Ok(room) = rooms.get(visitor_id) {
        let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
        snap.staffs.clear();
        snap.staffs.insert(
            staff.id.clone(),
            RoomStaff { staff: staff.clone(), sid: sid.clone() },
        );
        events.publish(
            Topic::Room(visitor_id.to_string()),
            events::STAFFS_IN_CHAT_CHANGED,
            serde_json::json!({"visitor": visitor_id, "staffs": [staff]}),
        );
    }
    // Old holders no longer receive this room's traffic.
    for old in prior {
        if let Some(old_sid) = registry.staff_sid(&old.org_id, &old.id) {
            registry.leave(&old_sid, &Topic::Room(visitor_id.to_string()));
        }
    }
    if let Some(sid) = sid {
        registry.join(&sid, Topic::Room(visitor_id.to_string()));
        events.publish(
            Topic::Sid(sid),
            events::STAFF_AUTO_ASSIGNED_CHAT,
            serde_json::json!({"visitor": visitor_id}),
        );
    }
}

/// Both phases, for callers with a private connection (the sweep timer).
#[allow(clippy::too_many_arguments)]
pub fn reassign_visitor_chat(
    conn: &Connection,
    registry: &SessionRegistry,
    rooms: &RoomStore,
    queues: &QueueIndex,
    assign: &AssignmentEngine,
    events: &EventBus,
    notifier: &Notifier,
    settings: &Settings,
    visitor_id: &str,
) -> Result<Option<Staff>> {
    let Some((staff, prior)) =
        reassign_edges(conn, registry, queues, assign, events, notifier, settings, visitor_id)?
    else {
        return Ok(None);
    };
    sync_room_after_reassign(registry, rooms, events, visitor_id, &staff, &prior);
    Ok(Some(staff))
}

/// One sweep: re-run assignment for every unhandled chat waiting beyond the
/// configured threshold. Returns how many chats were handed over.
#[allow(clippy::too_many_arguments)]
pub fn run_reassign_sweep(
    conn: &Connection,
    registry: &SessionRegistry,
    rooms: &RoomStore,
    queues: &QueueIndex,
    assign: &AssignmentEngine,
    events: &EventBus,
    notifier: &Notifier,
) -> usize {
    let settings = Settings::load(conn);
    if settings.auto_reassign == 0 {
        return 0;
    }
    let waiting = db::unhandled_older_than(conn, settings.hours_to_auto_reassign);
    let mut reassigned = 0;
    for visitor in waiting {
        match reassign_visitor_chat(
            conn, registry, rooms, queues, assign, events, notifier, &settings, &visitor.id,
        ) {
            Ok(Some(_)) => reassigned += 1,
            Ok(None) => {}
            Err(e) => eprintln!("⚠️ Reassign sweep: visitor {}: {e}", visitor.id),
        }
    }
    if reassigned > 0 {
        eprintln!("🔁 Reassign sweep: handed over {reassigned} chats");
    }
    reassigned
}

/// Spawns the periodic reassignment sweep. The task opens its own
/// connection and never holds a room lock across iterations.
pub fn spawn_reassign_task(db_path: String, handles: EngineHandles) {
    let interval = std::env::var("REASSIGN_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(REASSIGN_INTERVAL_SECS);
    tokio::spawn(async move {
        let conn = match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️ Reassign task: failed to open DB: {e}");
                return;
            }
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;").ok();
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
            run_reassign_sweep(
                &conn,
                &handles.registry,
                &handles.rooms,
                &handles.queues,
                &handles.assign,
                &handles.events,
                &handles.notifier,
            );
        }
    });
}

/// Spawns the cooperative-liveness reaper: sessions with no traffic inside
/// the idle window get the full disconnect treatment.
pub fn spawn_session_reaper(db: Db, handles: EngineHandles) {
    let idle = std::env::var("SESSION_IDLE_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SESSION_IDLE_SECS);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(REAPER_INTERVAL_SECS)).await;
            let stale = handles
                .registry
                .stale_sids(std::time::Duration::from_secs(idle));
            for sid in stale {
                sessions::disconnect_session(
                    &db,
                    &handles.registry,
                    &handles.rooms,
                    &handles.queues,
                    &handles.events,
                    &sid,
                );
            }
        }
    });
}
