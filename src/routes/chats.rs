use rocket::serde::json::Json;
use rocket::{State, get, post};
use rusqlite::params;

use super::StaffBearer;
use crate::db::{self, Db};
use crate::error::ChatError;
use crate::models::*;

/// Offline-unclaimed queue page, FIFO by queue insertion. The staff console
/// reads 15 at a time.
#[get("/api/v1/chats/unclaimed?<offset>&<limit>")]
pub fn unclaimed_chats(
    db: &State<Db>,
    _staff: StaffBearer,
    offset: Option<i64>,
    limit: Option<i64>,
) -> Json<Vec<OfflineUnclaimedEntry>> {
    let conn = db.conn();
    let limit = limit.unwrap_or(15).clamp(1, 100);
    Json(db::unclaimed_slice(&conn, offset.unwrap_or(0).max(0), limit))
}

#[get("/api/v1/chats/flagged?<offset>&<limit>")]
pub fn flagged_chats(
    db: &State<Db>,
    _staff: StaffBearer,
    offset: Option<i64>,
    limit: Option<i64>,
) -> Json<Vec<FlaggedEntry>> {
    let conn = db.conn();
    let limit = limit.unwrap_or(15).clamp(1, 100);
    Json(db::flagged_slice(&conn, offset.unwrap_or(0).max(0), limit))
}

/// Chat history page, ascending by sequence number.
#[get("/api/v1/chats/<visitor_id>/messages?<after>&<limit>")]
pub fn chat_messages(
    db: &State<Db>,
    _staff: StaffBearer,
    visitor_id: &str,
    after: Option<i64>,
    limit: Option<i64>,
) -> Json<Ack> {
    let conn = db.conn();
    let Some(visitor) = db::get_visitor(&conn, visitor_id) else {
        return Json(ChatError::Validation("visitor".into()).into());
    };
    let chat = match db::get_or_create_chat(&conn, &visitor.id) {
        Ok(chat) => chat,
        Err(e) => return Json(ChatError::from(e).into()),
    };
    let limit = limit.unwrap_or(50).clamp(1, 500);
    let after = after.unwrap_or(0);

    let mut stmt = match conn.prepare(
        "SELECT * FROM chat_messages WHERE chat_id = ?1 AND sequence_num > ?2
         ORDER BY sequence_num ASC LIMIT ?3",
    ) {
        Ok(s) => s,
        Err(e) => return Json(ChatError::from(e).into()),
    };
    let messages: Vec<ChatMessage> = stmt
        .query_map(params![&chat.id, after, limit], db::map_message)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default();

    Json(Ack::ok_with(serde_json::json!({"chat": chat, "messages": messages})))
}

/// Advance the per-staff read cursor for a chat.
#[post("/api/v1/chats/<visitor_id>/seen", format = "json", data = "<body>")]
pub fn mark_chat_seen(
    db: &State<Db>,
    staff: StaffBearer,
    visitor_id: &str,
    body: Json<MarkSeenPayload>,
) -> Json<Ack> {
    let conn = db.conn();
    let Some(visitor) = db::get_visitor(&conn, visitor_id) else {
        return Json(ChatError::Validation("visitor".into()).into());
    };
    let chat = match db::get_or_create_chat(&conn, &visitor.id) {
        Ok(chat) => chat,
        Err(e) => return Json(ChatError::from(e).into()),
    };
    match db::upsert_seen_cursor(&conn, &staff.0.id, &chat.id, body.last_seen_msg_id.trim()) {
        Ok(()) => Json(Ack::ok()),
        Err(e) => Json(ChatError::from(e).into()),
    }
}

/// The staff's in-app notification feed, newest first, with their read
/// cursor alongside.
#[get("/api/v1/notifications?<limit>")]
pub fn notifications_feed(db: &State<Db>, staff: StaffBearer, limit: Option<i64>) -> Json<Ack> {
    let conn = db.conn();
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let notifications = db::notifications_for_staff(&conn, &staff.0.id, limit);
    let last_read = db::last_read_notification(&conn, &staff.0.id);
    Json(Ack::ok_with(serde_json::json!({
        "notifications": notifications,
        "last_read_internal_id": last_read,
    })))
}

#[post("/api/v1/notifications/read", format = "json", data = "<body>")]
pub fn notifications_read(
    db: &State<Db>,
    staff: StaffBearer,
    body: Json<NotificationsReadPayload>,
) -> Json<Ack> {
    let conn = db.conn();
    match db::set_notifications_read(&conn, &staff.0.id, body.last_read_internal_id) {
        Ok(()) => Json(Ack::ok()),
        Err(e) => Json(ChatError::from(e).into()),
    }
}
