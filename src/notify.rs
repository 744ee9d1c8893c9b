use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::db;
use crate::error::Result;

// Mailing taxonomy.
pub const MAIL_NEW_ASSIGNED_CHAT: &str = "new_assigned_chat";
pub const MAIL_REMOVED_FROM_CHAT: &str = "removed_from_chat";
pub const MAIL_FLAGGED_CHAT: &str = "flagged_chat";
pub const MAIL_NEW_STAFF_MSG_TO_VISITOR: &str = "new_staff_msg_to_visitor";
pub const MAIL_NEW_VISITOR_MSG_TO_STAFFS: &str = "new_visitor_msg_to_staffs";
pub const MAIL_ROLE_CHANGED: &str = "role_changed";
pub const MAIL_ACCOUNT_ENABLED: &str = "account_enabled";
pub const MAIL_ACCOUNT_DISABLED: &str = "account_disabled";
pub const MAIL_WELCOME: &str = "welcome";

/// Suppression window per (recipient, category).
const SUPPRESSION_WINDOW: Duration = Duration::from_secs(60 * 60);

/// How long the dispatcher sleeps between polls of the task table.
const DISPATCH_POLL_SECS: u64 = 5;

const MAX_DELIVERY_ATTEMPTS: i64 = 5;

/// In-app notification rows plus the durable outbound e-mail queue.
/// E-mails are fire-and-forget: enqueueing never blocks on SMTP, and a
/// failed delivery is retried with exponential backoff by the dispatcher.
#[derive(Clone)]
pub struct Notifier {
    suppression: Arc<Mutex<HashMap<String, Instant>>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier {
            suppression: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist an in-app notification for one staff.
    pub fn notify_staff(&self, conn: &Connection, staff_id: &str, content: &serde_json::Value) -> Result<()> {
        db::insert_notification(conn, staff_id, content)?;
        Ok(())
    }

    /// Persist an in-app notification for every supervisor and admin of the
    /// organisation.
    pub fn notify_high_ups(&self, conn: &Connection, org_id: &str, content: &serde_json::Value) -> Result<()> {
        for staff in db::high_ups(conn, org_id) {
            db::insert_notification(conn, &staff.id, content)?;
        }
        Ok(())
    }

    /// Enqueue an outbound e-mail unless the (recipient, category) pair is
    /// inside its suppression window. Returns whether a task was written.
    pub fn enqueue_email(
        &self,
        conn: &Connection,
        recipient: &str,
        category: &str,
        subject: &str,
        body: &str,
    ) -> Result<bool> {
        if !self.pass_suppression(recipient, category) {
            return Ok(false);
        }
        conn.execute(
            "INSERT INTO email_tasks (id, recipient, category, subject, body, attempts, next_attempt_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![db::generate_id(), recipient, category, subject, body, db::now_rfc3339()],
        )?;
        Ok(true)
    }

    fn pass_suppression(&self, recipient: &str, category: &str) -> bool {
        let key = format!("{category}:{recipient}");
        let now = Instant::now();
        let mut map = self.suppression.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&last) = map.get(&key)
            && now.duration_since(last) < SUPPRESSION_WINDOW
        {
            return false;
        }
        map.insert(key, now);
        map.retain(|_, &mut t| now.duration_since(t) < SUPPRESSION_WINDOW);
        true
    }
}

/// Spawns the background task that drains `email_tasks` and POSTs each one
/// to the configured mail relay. Without a relay URL, deliveries are logged
/// and marked sent so the queue cannot grow unbounded in dev setups.
pub fn spawn_email_dispatcher(db_path: String, relay_url: Option<String>) {
    tokio::spawn(async move {
        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️ Email dispatcher: failed to build HTTP client: {e}");
                return;
            }
        };
        let conn = match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("⚠️ Email dispatcher: failed to open DB: {e}");
                return;
            }
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;").ok();

        loop {
            let due = due_tasks(&conn);
            for task in due {
                match deliver(&client, relay_url.as_deref(), &task).await {
                    Ok(()) => {
                        conn.execute(
                            "UPDATE email_tasks SET sent_at = ?1 WHERE id = ?2",
                            params![db::now_rfc3339(), &task.id],
                        )
                        .ok();
                    }
                    Err(e) => {
                        let attempts = task.attempts + 1;
                        // Exponential backoff: 30s, 60s, 120s, ...
                        let delay = 30i64.saturating_mul(1 << attempts.min(10));
                        let next = (chrono::Utc::now() + chrono::Duration::seconds(delay)).to_rfc3339();
                        conn.execute(
                            "UPDATE email_tasks SET attempts = ?1, next_attempt_at = ?2, last_error = ?3 WHERE id = ?4",
                            params![attempts, &next, e, &task.id],
                        )
                        .ok();
                        if attempts >= MAX_DELIVERY_ATTEMPTS {
                            eprintln!(
                                "⚠️ Email to {} ({}) dropped after {} attempts: {}",
                                task.recipient, task.category, attempts, e
                            );
                        }
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(DISPATCH_POLL_SECS)).await;
        }
    });
}

struct EmailTask {
    id: String,
    recipient: String,
    category: String,
    subject: String,
    body: String,
    attempts: i64,
}

fn due_tasks(conn: &Connection) -> Vec<EmailTask> {
    let now = db::now_rfc3339();
    let mut stmt = match conn.prepare(
        "SELECT id, recipient, category, subject, body, attempts FROM email_tasks
         WHERE sent_at IS NULL AND attempts < ?1 AND next_attempt_at <= ?2
         ORDER BY created_at ASC LIMIT 50",
    ) {
        Ok(s) => s,
        Err(_) => return vec![],
    };
    stmt.query_map(params![MAX_DELIVERY_ATTEMPTS, &now], |row| {
        Ok(EmailTask {
            id: row.get(0)?,
            recipient: row.get(1)?,
            category: row.get(2)?,
            subject: row.get(3)?,
            body: row.get(4)?,
            attempts: row.get(5)?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

async fn deliver(
    client: &reqwest::Client,
    relay_url: Option<&str>,
    task: &EmailTask,
) -> std::result::Result<(), String> {
    let Some(url) = relay_url else {
        eprintln!("📧 [no relay] {} -> {}: {}", task.category, task.recipient, task.subject);
        return Ok(());
    };
    let payload = serde_json::json!({
        "to": task.recipient,
        "category": task.category,
        "subject": task.subject,
        "body": task.body,
    });
    let resp = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status()));
    }
    Ok(())
}
