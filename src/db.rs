use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::*;

#[derive(Clone)]
pub struct Db {
    pub conn: Arc<Mutex<Connection>>,
}

/// Generate an entity id: 32 hex chars.
pub fn generate_id() -> String {
    format!("{:032x}", uuid::Uuid::new_v4().as_u128())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate();
        db
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) {
        let conn = self.conn();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS organisations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS staffs (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL REFERENCES organisations(id),
                role_id INTEGER NOT NULL DEFAULT 3,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL DEFAULT '',
                display_name TEXT NOT NULL DEFAULT '',
                full_name TEXT NOT NULL DEFAULT '',
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_staffs_org_role ON staffs(org_id, role_id);

            CREATE TABLE IF NOT EXISTS visitors (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE,
                password_hash TEXT,
                is_anonymous INTEGER NOT NULL DEFAULT 1,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                visitor_id TEXT NOT NULL UNIQUE REFERENCES visitors(id),
                severity_level INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                chat_id TEXT NOT NULL REFERENCES chats(id),
                sequence_num INTEGER NOT NULL,
                type_id INTEGER NOT NULL DEFAULT 1,
                sender_staff_id TEXT,
                content TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(chat_id, sequence_num)
            );
            CREATE INDEX IF NOT EXISTS idx_chat_messages_chat_seq ON chat_messages(chat_id, sequence_num);

            CREATE TABLE IF NOT EXISTS staff_subscription_chats (
                staff_id TEXT NOT NULL REFERENCES staffs(id),
                visitor_id TEXT NOT NULL REFERENCES visitors(id),
                created_at TEXT NOT NULL,
                UNIQUE(staff_id, visitor_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subscriptions_visitor ON staff_subscription_chats(visitor_id);

            CREATE TABLE IF NOT EXISTS chat_unclaimed (
                visitor_id TEXT NOT NULL UNIQUE REFERENCES visitors(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_unhandled (
                visitor_id TEXT NOT NULL UNIQUE REFERENCES visitors(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_flagged (
                visitor_id TEXT NOT NULL UNIQUE REFERENCES visitors(id),
                flag_message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_message_seen (
                staff_id TEXT NOT NULL REFERENCES staffs(id),
                chat_id TEXT NOT NULL REFERENCES chats(id),
                last_seen_msg_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (staff_id, chat_id)
            );

            CREATE TABLE IF NOT EXISTS notification_staff (
                internal_id INTEGER PRIMARY KEY AUTOINCREMENT,
                staff_id TEXT NOT NULL REFERENCES staffs(id),
                content TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notification_staff ON notification_staff(staff_id, internal_id);

            CREATE TABLE IF NOT EXISTS notification_staff_read (
                staff_id TEXT PRIMARY KEY REFERENCES staffs(id),
                last_read_internal_id INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS email_tasks (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                category TEXT NOT NULL,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TEXT NOT NULL,
                sent_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_email_tasks_due ON email_tasks(sent_at, next_attempt_at);",
        )
        .expect("Failed to run migrations");

        // Default settings rows (INSERT OR IGNORE keeps operator overrides)
        let defaults: &[(&str, i64)] = &[
            ("login_type", 0),
            ("allow_claiming_chat", 1),
            ("max_staffs_in_chat", 1),
            ("auto_assign", 1),
            ("auto_reassign", 1),
            ("hours_to_auto_reassign", 24),
        ];
        for (key, value) in defaults {
            conn.execute(
                "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .ok();
        }

        // Seed the default organisation if none exists
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM organisations", [], |r| r.get(0))
            .unwrap_or(0);
        if count == 0 {
            let now = now_rfc3339();
            conn.execute(
                "INSERT INTO organisations (id, name, disabled, created_at, updated_at) VALUES (?1, ?2, 0, ?3, ?4)",
                params![generate_id(), "helpline", &now, &now],
            )
            .ok();
        }
    }
}

// --- Row mappers ---

pub fn map_staff(row: &rusqlite::Row) -> rusqlite::Result<Staff> {
    Ok(Staff {
        id: row.get("id")?,
        org_id: row.get("org_id")?,
        role_id: row.get("role_id")?,
        email: row.get("email")?,
        display_name: row.get("display_name")?,
        full_name: row.get("full_name")?,
        disabled: row.get::<_, i64>("disabled")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn map_visitor(row: &rusqlite::Row) -> rusqlite::Result<Visitor> {
    Ok(Visitor {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        is_anonymous: row.get::<_, i64>("is_anonymous")? != 0,
        disabled: row.get::<_, i64>("disabled")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn map_chat(row: &rusqlite::Row) -> rusqlite::Result<Chat> {
    let tags: String = row.get("tags")?;
    Ok(Chat {
        id: row.get("id")?,
        visitor_id: row.get("visitor_id")?,
        severity_level: row.get("severity_level")?,
        tags: serde_json::from_str(&tags).unwrap_or(serde_json::json!([])),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn map_message(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let content: String = row.get("content")?;
    Ok(ChatMessage {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        sequence_num: row.get("sequence_num")?,
        type_id: row.get("type_id")?,
        sender_staff_id: row.get("sender_staff_id")?,
        content: serde_json::from_str(&content).unwrap_or(serde_json::json!({})),
        created_at: row.get("created_at")?,
    })
}

// --- Typed repository calls ---

pub fn get_staff(conn: &Connection, id: &str) -> Option<Staff> {
    conn.query_row("SELECT * FROM staffs WHERE id = ?1", params![id], map_staff)
        .optional()
        .ok()
        .flatten()
}

pub fn get_visitor(conn: &Connection, id: &str) -> Option<Visitor> {
    conn.query_row("SELECT * FROM visitors WHERE id = ?1", params![id], map_visitor)
        .optional()
        .ok()
        .flatten()
}

/// Single-organisation deployment: the first (and only) enabled org.
pub fn first_org_id(conn: &Connection) -> Option<String> {
    conn.query_row(
        "SELECT id FROM organisations WHERE disabled = 0 ORDER BY created_at ASC LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
    .ok()
    .flatten()
}

/// Exactly one Chat per Visitor; created on first connect or first message.
pub fn get_or_create_chat(conn: &Connection, visitor_id: &str) -> rusqlite::Result<Chat> {
    if let Some(chat) = conn
        .query_row(
            "SELECT * FROM chats WHERE visitor_id = ?1",
            params![visitor_id],
            map_chat,
        )
        .optional()?
    {
        return Ok(chat);
    }
    let now = now_rfc3339();
    let id = generate_id();
    conn.execute(
        "INSERT OR IGNORE INTO chats (id, visitor_id, severity_level, tags, created_at, updated_at) VALUES (?1, ?2, 0, '[]', ?3, ?4)",
        params![&id, visitor_id, &now, &now],
    )?;
    conn.query_row(
        "SELECT * FROM chats WHERE visitor_id = ?1",
        params![visitor_id],
        map_chat,
    )
}

pub fn max_sequence_num(conn: &Connection, chat_id: &str) -> i64 {
    conn.query_row(
        "SELECT COALESCE(MAX(sequence_num), 0) FROM chat_messages WHERE chat_id = ?1",
        params![chat_id],
        |r| r.get(0),
    )
    .unwrap_or(0)
}

pub fn insert_message(conn: &Connection, msg: &ChatMessage) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chat_messages (id, chat_id, sequence_num, type_id, sender_staff_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &msg.id,
            &msg.chat_id,
            msg.sequence_num,
            msg.type_id,
            &msg.sender_staff_id,
            serde_json::to_string(&msg.content).unwrap_or_else(|_| "{}".into()),
            &msg.created_at
        ],
    )?;
    Ok(())
}

pub fn recent_messages(conn: &Connection, chat_id: &str, limit: i64) -> Vec<ChatMessage> {
    let mut stmt = match conn.prepare(
        "SELECT * FROM (SELECT * FROM chat_messages WHERE chat_id = ?1 ORDER BY sequence_num DESC LIMIT ?2)
         ORDER BY sequence_num ASC",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![chat_id, limit], map_message)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

// --- Subscriptions (the durable assignment edge) ---

/// Idempotent via UNIQUE(staff_id, visitor_id). Returns true if a new edge
/// was written.
pub fn add_subscription(conn: &Connection, staff_id: &str, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO staff_subscription_chats (staff_id, visitor_id, created_at) VALUES (?1, ?2, ?3)",
        params![staff_id, visitor_id, now_rfc3339()],
    )?;
    Ok(n > 0)
}

pub fn remove_subscription(conn: &Connection, staff_id: &str, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM staff_subscription_chats WHERE staff_id = ?1 AND visitor_id = ?2",
        params![staff_id, visitor_id],
    )?;
    Ok(n > 0)
}

pub fn remove_subscriptions_for_visitor(conn: &Connection, visitor_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM staff_subscription_chats WHERE visitor_id = ?1",
        params![visitor_id],
    )
}

pub fn remove_subscriptions_for_staff(conn: &Connection, staff_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM staff_subscription_chats WHERE staff_id = ?1",
        params![staff_id],
    )
}

pub fn subscribed_staffs(conn: &Connection, visitor_id: &str) -> Vec<Staff> {
    let mut stmt = match conn.prepare(
        "SELECT s.* FROM staffs s
         JOIN staff_subscription_chats ssc ON ssc.staff_id = s.id
         WHERE ssc.visitor_id = ?1
         ORDER BY ssc.created_at ASC",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![visitor_id], map_staff)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

pub fn subscribed_visitor_ids(conn: &Connection, staff_id: &str) -> Vec<String> {
    let mut stmt = match conn.prepare(
        "SELECT visitor_id FROM staff_subscription_chats WHERE staff_id = ?1 ORDER BY created_at ASC",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![staff_id], |row| row.get(0))
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

// --- Durable queues ---

pub fn unclaimed_push(conn: &Connection, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO chat_unclaimed (visitor_id, created_at) VALUES (?1, ?2)",
        params![visitor_id, now_rfc3339()],
    )?;
    Ok(n > 0)
}

pub fn unclaimed_remove(conn: &Connection, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM chat_unclaimed WHERE visitor_id = ?1",
        params![visitor_id],
    )?;
    Ok(n > 0)
}

pub fn unclaimed_contains(conn: &Connection, visitor_id: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM chat_unclaimed WHERE visitor_id = ?1",
        params![visitor_id],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
    .unwrap_or(false)
}

pub fn unclaimed_slice(conn: &Connection, offset: i64, limit: i64) -> Vec<OfflineUnclaimedEntry> {
    let mut stmt = match conn.prepare(
        "SELECT v.*, cu.created_at AS queued_at FROM chat_unclaimed cu
         JOIN visitors v ON v.id = cu.visitor_id
         ORDER BY cu.created_at ASC LIMIT ?1 OFFSET ?2",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![limit, offset], |row| {
        Ok(OfflineUnclaimedEntry {
            visitor: map_visitor(row)?,
            created_at: row.get("queued_at")?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

pub fn unhandled_push(conn: &Connection, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO chat_unhandled (visitor_id, created_at) VALUES (?1, ?2)",
        params![visitor_id, now_rfc3339()],
    )?;
    Ok(n > 0)
}

pub fn unhandled_remove(conn: &Connection, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM chat_unhandled WHERE visitor_id = ?1",
        params![visitor_id],
    )?;
    Ok(n > 0)
}

pub fn unhandled_contains(conn: &Connection, visitor_id: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM chat_unhandled WHERE visitor_id = ?1",
        params![visitor_id],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
    .unwrap_or(false)
}

/// Visitors whose unanswered message has been waiting longer than the
/// threshold, FIFO by queue insertion.
pub fn unhandled_older_than(conn: &Connection, hours: i64) -> Vec<Visitor> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
    let mut stmt = match conn.prepare(
        "SELECT v.* FROM chat_unhandled cu
         JOIN visitors v ON v.id = cu.visitor_id
         WHERE cu.created_at < ?1
         ORDER BY cu.created_at ASC",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![cutoff], map_visitor)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

pub fn flagged_push(conn: &Connection, visitor_id: &str, flag_message: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "INSERT INTO chat_flagged (visitor_id, flag_message, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(visitor_id) DO UPDATE SET flag_message = excluded.flag_message",
        params![visitor_id, flag_message, now_rfc3339()],
    )?;
    Ok(n > 0)
}

pub fn flagged_remove(conn: &Connection, visitor_id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(
        "DELETE FROM chat_flagged WHERE visitor_id = ?1",
        params![visitor_id],
    )?;
    Ok(n > 0)
}

pub fn flagged_contains(conn: &Connection, visitor_id: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM chat_flagged WHERE visitor_id = ?1",
        params![visitor_id],
        |_| Ok(()),
    )
    .optional()
    .map(|r| r.is_some())
    .unwrap_or(false)
}

pub fn flagged_slice(conn: &Connection, offset: i64, limit: i64) -> Vec<FlaggedEntry> {
    let mut stmt = match conn.prepare(
        "SELECT v.*, cf.flag_message AS flag_message, cf.created_at AS flagged_at FROM chat_flagged cf
         JOIN visitors v ON v.id = cf.visitor_id
         ORDER BY cf.created_at ASC LIMIT ?1 OFFSET ?2",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![limit, offset], |row| {
        Ok(FlaggedEntry {
            visitor: map_visitor(row)?,
            flag_message: row.get("flag_message")?,
            created_at: row.get("flagged_at")?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

// --- Volunteers (agents available for assignment) ---

pub fn all_volunteers(conn: &Connection) -> Vec<Staff> {
    let mut stmt = match conn.prepare(
        "SELECT * FROM staffs WHERE role_id = ?1 AND disabled = 0 ORDER BY created_at ASC, id ASC",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![ROLE_AGENT], map_staff)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

pub fn high_ups(conn: &Connection, org_id: &str) -> Vec<Staff> {
    let mut stmt = match conn.prepare(
        "SELECT * FROM staffs WHERE org_id = ?1 AND role_id < ?2 AND disabled = 0",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![org_id, ROLE_AGENT], map_staff)
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}

// --- Notifications ---

pub fn insert_notification(conn: &Connection, staff_id: &str, content: &serde_json::Value) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO notification_staff (staff_id, content, created_at) VALUES (?1, ?2, ?3)",
        params![
            staff_id,
            serde_json::to_string(content).unwrap_or_else(|_| "{}".into()),
            now_rfc3339()
        ],
    )?;
    Ok(())
}

pub fn notifications_for_staff(conn: &Connection, staff_id: &str, limit: i64) -> Vec<StaffNotification> {
    let mut stmt = match conn.prepare(
        "SELECT internal_id, staff_id, content, created_at FROM notification_staff
         WHERE staff_id = ?1 ORDER BY internal_id DESC LIMIT ?2",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![staff_id, limit], |row| {
        let content: String = row.get("content")?;
        Ok(StaffNotification {
            internal_id: row.get("internal_id")?,
            staff_id: row.get("staff_id")?,
            content: serde_json::from_str(&content).unwrap_or(serde_json::json!({})),
            created_at: row.get("created_at")?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

pub fn set_notifications_read(conn: &Connection, staff_id: &str, last_read: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO notification_staff_read (staff_id, last_read_internal_id) VALUES (?1, ?2)
         ON CONFLICT(staff_id) DO UPDATE SET last_read_internal_id = excluded.last_read_internal_id",
        params![staff_id, last_read],
    )?;
    Ok(())
}

pub fn last_read_notification(conn: &Connection, staff_id: &str) -> i64 {
    conn.query_row(
        "SELECT last_read_internal_id FROM notification_staff_read WHERE staff_id = ?1",
        params![staff_id],
        |r| r.get(0),
    )
    .unwrap_or(0)
}

// --- Read cursor ---

pub fn upsert_seen_cursor(conn: &Connection, staff_id: &str, chat_id: &str, msg_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO chat_message_seen (staff_id, chat_id, last_seen_msg_id, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(staff_id, chat_id) DO UPDATE SET last_seen_msg_id = excluded.last_seen_msg_id, updated_at = excluded.updated_at",
        params![staff_id, chat_id, msg_id, now_rfc3339()],
    )?;
    Ok(())
}

// --- Seeding (ops tooling and tests) ---

pub fn insert_organisation(conn: &Connection, name: &str) -> rusqlite::Result<String> {
    let id = generate_id();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO organisations (id, name, disabled, created_at, updated_at) VALUES (?1, ?2, 0, ?3, ?4)",
        params![&id, name, &now, &now],
    )?;
    Ok(id)
}

pub fn insert_staff(
    conn: &Connection,
    org_id: &str,
    role_id: i64,
    email: &str,
    display_name: &str,
) -> rusqlite::Result<Staff> {
    let id = generate_id();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO staffs (id, org_id, role_id, email, display_name, full_name, disabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, ?6, ?7)",
        params![&id, org_id, role_id, email, display_name, &now, &now],
    )?;
    conn.query_row("SELECT * FROM staffs WHERE id = ?1", params![&id], map_staff)
}

pub fn insert_visitor(
    conn: &Connection,
    name: &str,
    email: Option<&str>,
) -> rusqlite::Result<Visitor> {
    let id = generate_id();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO visitors (id, name, email, is_anonymous, disabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
        params![&id, name, email, email.is_none() as i64, &now, &now],
    )?;
    conn.query_row("SELECT * FROM visitors WHERE id = ?1", params![&id], map_visitor)
}
