use rocket::serde::json::Json;
use rocket::{State, get, post, put};

use super::StaffBearer;
use crate::assign::AssignmentEngine;
use crate::db::{self, Db};
use crate::error::ChatError;
use crate::events::EventBus;
use crate::models::*;
use crate::notify::{self, Notifier};
use crate::queues::QueueIndex;
use crate::rooms::RoomStore;
use crate::sessions::SessionRegistry;
use crate::settings::{Settings, SettingsCache};
use crate::tasks::{reassign_edges, sync_room_after_reassign};

#[get("/api/v1/settings")]
pub fn get_settings(settings: &State<SettingsCache>, _staff: StaffBearer) -> Json<Settings> {
    Json(settings.current())
}

/// Write one or more settings keys. Admin-only; the cache refreshes on
/// every write so later reads see the new values.
#[put("/api/v1/settings", format = "json", data = "<body>")]
pub fn update_settings(
    db: &State<Db>,
    settings: &State<SettingsCache>,
    staff: StaffBearer,
    body: Json<serde_json::Value>,
) -> Json<Ack> {
    if !role_permits(staff.0.role_id, StaffAction::ModifyGlobalSettings) {
        return Json(ChatError::PermissionDenied.into());
    }
    let Some(changes) = body.as_object() else {
        return Json(ChatError::Validation("settings".into()).into());
    };
    let conn = db.conn();
    match settings.update(&conn, changes) {
        Ok(updated) => serde_json::to_value(&updated)
            .map(|v| Json(Ack::ok_with(v)))
            .unwrap_or_else(|e| Json(Ack::err(e.to_string()))),
        Err(e) => Json(e.into()),
    }
}

/// Enable or disable a staff account. Disabling removes every chat
/// subscription in the same handler and hands orphaned visitors back to the
/// assignment engine.
#[post("/api/v1/staff/<staff_id>/disabled", format = "json", data = "<body>")]
#[allow(clippy::too_many_arguments)]
pub fn set_staff_disabled(
    db: &State<Db>,
    registry: &State<SessionRegistry>,
    rooms: &State<RoomStore>,
    queues: &State<QueueIndex>,
    assign: &State<AssignmentEngine>,
    events: &State<EventBus>,
    notifier: &State<Notifier>,
    settings: &State<SettingsCache>,
    actor: StaffBearer,
    staff_id: &str,
    body: Json<SetDisabledPayload>,
) -> Json<Ack> {
    if !role_permits(actor.0.role_id, StaffAction::DisableStaff) {
        return Json(ChatError::PermissionDenied.into());
    }

    let (target, served, orphaned) = {
        let conn = db.conn();
        let Some(target) = db::get_staff(&conn, staff_id) else {
            return Json(ChatError::Validation("staff".into()).into());
        };
        if let Err(e) = conn.execute(
            "UPDATE staffs SET disabled = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![body.disabled as i64, db::now_rfc3339(), staff_id],
        ) {
            return Json(ChatError::from(e).into());
        }

        let mut served = Vec::new();
        let mut orphaned = Vec::new();
        if body.disabled {
            served = db::subscribed_visitor_ids(&conn, staff_id);
            if let Err(e) = db::remove_subscriptions_for_staff(&conn, staff_id) {
                return Json(ChatError::from(e).into());
            }
            for visitor_id in &served {
                if db::subscribed_staffs(&conn, visitor_id).is_empty() {
                    orphaned.push(visitor_id.clone());
                }
            }
        }
        (target, served, orphaned)
    };

    // The volunteer ring no longer matches the staffs table.
    assign.invalidate();

    // Scrub the disabled staff out of any live room they were serving.
    if body.disabled {
        for visitor_id in &served {
            if let Ok(room) = rooms.get(visitor_id) {
                let mut snap = room.lock().unwrap_or_else(|e| e.into_inner());
                snap.staffs.remove(staff_id);
            }
        }
        let current = settings.current();
        for visitor_id in &orphaned {
            let reassigned = {
                let conn = db.conn();
                reassign_edges(&conn, registry, queues, assign, events, notifier, &current, visitor_id)
            };
            match reassigned {
                Ok(Some((staff, prior))) => {
                    sync_room_after_reassign(registry, rooms, events, visitor_id, &staff, &prior);
                }
                Ok(None) => {}
                Err(e) => eprintln!("⚠️ Reassign after disable: visitor {visitor_id}: {e}"),
            }
        }
    }

    let conn = db.conn();
    let (category, subject, body_text) = if body.disabled {
        (
            notify::MAIL_ACCOUNT_DISABLED,
            "Your account was disabled",
            "An administrator disabled your helpline account.",
        )
    } else {
        (
            notify::MAIL_ACCOUNT_ENABLED,
            "Your account was enabled",
            "An administrator enabled your helpline account.",
        )
    };
    let _ = notifier.enqueue_email(&conn, &target.email, category, subject, body_text);

    Json(Ack::ok())
}
