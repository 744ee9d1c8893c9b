use rocket::serde::json::Json;
use rocket::{State, catch, get};

use crate::db::Db;
use crate::sessions::SessionRegistry;

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "helpline-chat",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/api/v1/stats")]
pub fn stats(db: &State<Db>, registry: &State<SessionRegistry>) -> Json<serde_json::Value> {
    let conn = db.conn();
    let count = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap_or(0) };
    let chats = count("SELECT COUNT(*) FROM chats");
    let messages = count("SELECT COUNT(*) FROM chat_messages");
    let unclaimed_offline = count("SELECT COUNT(*) FROM chat_unclaimed");
    let unhandled = count("SELECT COUNT(*) FROM chat_unhandled");
    let flagged = count("SELECT COUNT(*) FROM chat_flagged");
    drop(conn);

    Json(serde_json::json!({
        "chats": chats,
        "messages": messages,
        "unclaimed_offline": unclaimed_offline,
        "unhandled": unhandled,
        "flagged": flagged,
        "online_visitors": registry.online_visitors().len(),
    }))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": "Resource not found"}))
}

#[catch(401)]
pub fn unauthorized() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": "Authentication fails"}))
}
