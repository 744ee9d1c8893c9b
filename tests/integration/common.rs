use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;
use tokio::sync::broadcast;

use helpline_chat::auth::{TokenSecret, issue_token};
use helpline_chat::db::{self, Db};
use helpline_chat::events::{Envelope, EventBus};
use helpline_chat::models::{Staff, Visitor};
use helpline_chat::settings::SettingsCache;

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Uses Option<Client> so we can drop the DB connection before deleting the
/// file (WAL mode holds it open).
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    // Unique temp DB per test (avoids parallel test contention)
    let db_path = format!(
        "/tmp/helpline_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let rocket = helpline_chat::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

// --- State access helpers ---

pub fn with_db<T>(client: &Client, f: impl FnOnce(&rusqlite::Connection) -> T) -> T {
    let db = client.rocket().state::<Db>().expect("managed Db");
    let conn = db.conn();
    f(&conn)
}

/// Apply settings overrides directly through the cache (same code path the
/// admin PUT uses).
pub fn configure(client: &Client, changes: serde_json::Value) {
    let cache = client
        .rocket()
        .state::<SettingsCache>()
        .expect("managed SettingsCache");
    with_db(client, |conn| {
        cache
            .update(conn, changes.as_object().expect("object"))
            .expect("settings update");
    });
}

// --- Seeding ---

pub fn org_id(client: &Client) -> String {
    with_db(client, |conn| db::first_org_id(conn).expect("seeded org"))
}

pub fn seed_visitor(client: &Client, name: &str) -> Visitor {
    with_db(client, |conn| db::insert_visitor(conn, name, None).expect("visitor"))
}

pub fn seed_visitor_with_email(client: &Client, name: &str, email: &str) -> Visitor {
    with_db(client, |conn| {
        db::insert_visitor(conn, name, Some(email)).expect("visitor")
    })
}

pub fn seed_staff(client: &Client, role_id: i64, email: &str) -> Staff {
    let org = org_id(client);
    with_db(client, |conn| {
        db::insert_staff(conn, &org, role_id, email, email.split('@').next().unwrap())
            .expect("staff")
    })
}

// --- Tokens / protocol ---

pub fn visitor_token(client: &Client, visitor: &Visitor) -> String {
    let secret = client.rocket().state::<TokenSecret>().expect("secret");
    issue_token(secret, &visitor.id, "visitor", 3600)
}

pub fn staff_token(client: &Client, staff: &Staff) -> String {
    let secret = client.rocket().state::<TokenSecret>().expect("secret");
    issue_token(secret, &staff.id, "staff", 3600)
}

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

/// POST /connect; returns the full ack JSON.
pub fn connect(client: &Client, token: &str) -> serde_json::Value {
    let res = client
        .post("/api/v1/realtime/connect")
        .header(bearer(token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().expect("ack json")
}

/// Connect and unwrap the assigned sid, asserting success.
pub fn connect_ok(client: &Client, token: &str) -> String {
    let ack = connect(client, token);
    assert_eq!(ack["ok"], true, "connect refused: {ack}");
    ack["data"]["sid"].as_str().expect("sid").to_string()
}

/// POST a realtime event with session binding; returns the ack JSON.
pub fn emit(
    client: &Client,
    token: &str,
    sid: &str,
    event: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    let res = client
        .post(format!("/api/v1/realtime/{event}"))
        .header(ContentType::JSON)
        .header(bearer(token))
        .header(Header::new("X-Session-Id", sid.to_string()))
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok, "event {event} failed at HTTP level");
    res.into_json().expect("ack json")
}

/// POST a bodyless realtime event (leave / disconnect).
pub fn emit_empty(client: &Client, token: &str, sid: &str, event: &str) -> serde_json::Value {
    let res = client
        .post(format!("/api/v1/realtime/{event}"))
        .header(bearer(token))
        .header(Header::new("X-Session-Id", sid.to_string()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok, "event {event} failed at HTTP level");
    res.into_json().expect("ack json")
}

// --- Fan-out probe ---

/// Subscribes to the broadcast bus; handlers publish synchronously during
/// dispatch, so draining after an action sees everything it emitted.
pub struct EventProbe {
    rx: broadcast::Receiver<Envelope>,
}

impl EventProbe {
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(env) = self.rx.try_recv() {
            out.push(env);
        }
        out
    }
}

pub fn probe(client: &Client) -> EventProbe {
    let bus = client.rocket().state::<EventBus>().expect("managed EventBus");
    EventProbe { rx: bus.subscribe() }
}

/// Count envelopes with the given event name in a drained batch.
pub fn count_events(envelopes: &[Envelope], name: &str) -> usize {
    envelopes.iter().filter(|e| e.name == name).count()
}
