use rocket::http::{ContentType, Header, Status};

use crate::common::*;
use helpline_chat::db;
use helpline_chat::models::{ROLE_ADMIN, ROLE_AGENT};

fn bearer(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

#[test]
fn settings_round_trip_through_the_api() {
    let client = test_client();
    let admin = seed_staff(&client, ROLE_ADMIN, "admin@example.org");
    let token = staff_token(&client, &admin);

    let res = client
        .put("/api/v1/settings")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(r#"{"max_staffs_in_chat": 4, "hours_to_auto_reassign": 12}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], true);
    assert_eq!(ack["data"]["max_staffs_in_chat"], 4);

    // The cache was refreshed on write.
    let res = client
        .get("/api/v1/settings")
        .header(bearer(&token))
        .dispatch();
    let settings: serde_json::Value = res.into_json().unwrap();
    assert_eq!(settings["max_staffs_in_chat"], 4);
    assert_eq!(settings["hours_to_auto_reassign"], 12);
}

#[test]
fn settings_writes_are_admin_only() {
    let client = test_client();
    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let token = staff_token(&client, &agent);

    let res = client
        .put("/api/v1/settings")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(r#"{"max_staffs_in_chat": 4}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], false);

    let res = client
        .get("/api/v1/settings")
        .header(bearer(&token))
        .dispatch();
    let settings: serde_json::Value = res.into_json().unwrap();
    assert_eq!(settings["max_staffs_in_chat"], 1);
}

#[test]
fn unknown_settings_key_is_rejected() {
    let client = test_client();
    let admin = seed_staff(&client, ROLE_ADMIN, "admin@example.org");
    let token = staff_token(&client, &admin);

    let res = client
        .put("/api/v1/settings")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(r#"{"no_such_key": 1}"#)
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], false);
    assert!(ack["error"].as_str().unwrap().contains("no_such_key"));
}

#[test]
fn disabling_staff_strips_subscriptions_and_reassigns() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "hi"}));

    let holder = seed_staff(&client, ROLE_AGENT, "holder@example.org");
    let other = seed_staff(&client, ROLE_AGENT, "other@example.org");
    let htoken = staff_token(&client, &holder);
    let hsid = connect_ok(&client, &htoken);
    emit(&client, &htoken, &hsid, "staff_join", serde_json::json!({"visitor": visitor.id}));

    configure(&client, serde_json::json!({"auto_assign": 1}));
    let admin = seed_staff(&client, ROLE_ADMIN, "admin@example.org");
    let atoken = staff_token(&client, &admin);

    let res = client
        .post(format!("/api/v1/staff/{}/disabled", holder.id))
        .header(ContentType::JSON)
        .header(bearer(&atoken))
        .body(r#"{"disabled": true}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], true);

    with_db(&client, |conn| {
        // Not a single subscription row survives for the disabled staff.
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM staff_subscription_chats WHERE staff_id = ?1",
                [&holder.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);

        // The orphaned visitor was handed to the remaining volunteer.
        let subscribed = db::subscribed_staffs(conn, &visitor.id);
        assert_eq!(subscribed.len(), 1);
        assert_eq!(subscribed[0].id, other.id);

        // The account mail went to the queue.
        let emails: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM email_tasks WHERE recipient = ?1 AND category = 'account_disabled'",
                [&holder.email],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(emails, 1);
    });

    // The disabled staff can no longer authenticate.
    let res = client
        .post("/api/v1/realtime/connect")
        .header(bearer(&htoken))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn disabling_staff_requires_admin() {
    let client = test_client();
    let a1 = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let a2 = seed_staff(&client, ROLE_AGENT, "agent2@example.org");
    let token = staff_token(&client, &a1);

    let res = client
        .post(format!("/api/v1/staff/{}/disabled", a2.id))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(r#"{"disabled": true}"#)
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], false);
}

#[test]
fn queue_pages_are_staff_readable() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "hi"}));
    emit_empty(&client, &vtoken, &vsid, "disconnect_request");

    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let token = staff_token(&client, &agent);

    let res = client
        .get("/api/v1/chats/unclaimed?offset=0&limit=15")
        .header(bearer(&token))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let page: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["visitor"]["id"], visitor.id.as_str());

    // Visitors cannot read staff-only surfaces.
    let res = client
        .get("/api/v1/chats/unclaimed")
        .header(bearer(&vtoken))
        .dispatch();
    assert_eq!(res.status(), Status::Unauthorized);
}

#[test]
fn chat_history_and_read_cursor() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "one"}));
    emit(&client, &vtoken, &vsid, "visitor_msg_unclaimed", serde_json::json!({"value": "two"}));

    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let token = staff_token(&client, &agent);

    let res = client
        .get(format!("/api/v1/chats/{}/messages", visitor.id))
        .header(bearer(&token))
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], true);
    let messages = ack["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["sequence_num"], 1);
    assert_eq!(messages[1]["sequence_num"], 2);

    let last_id = messages[1]["id"].as_str().unwrap();
    let res = client
        .post(format!("/api/v1/chats/{}/seen", visitor.id))
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(serde_json::json!({"last_seen_msg_id": last_id}).to_string())
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], true);

    with_db(&client, |conn| {
        let cursor: String = conn
            .query_row(
                "SELECT last_seen_msg_id FROM chat_message_seen WHERE staff_id = ?1",
                [&agent.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(cursor, last_id);
    });
}

#[test]
fn notifications_feed_and_read_cursor() {
    let client = test_client();
    let admin = seed_staff(&client, ROLE_ADMIN, "admin@example.org");
    let token = staff_token(&client, &admin);
    with_db(&client, |conn| {
        db::insert_notification(conn, &admin.id, &serde_json::json!({"kind": "flagged_chat"})).unwrap();
        db::insert_notification(conn, &admin.id, &serde_json::json!({"kind": "assigned_chat"})).unwrap();
    });

    let res = client
        .get("/api/v1/notifications")
        .header(bearer(&token))
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], true);
    let feed = ack["data"]["notifications"].as_array().unwrap();
    assert_eq!(feed.len(), 2);
    // Newest first.
    assert_eq!(feed[0]["content"]["kind"], "assigned_chat");
    assert_eq!(ack["data"]["last_read_internal_id"], 0);

    let newest = feed[0]["internal_id"].as_i64().unwrap();
    let res = client
        .post("/api/v1/notifications/read")
        .header(ContentType::JSON)
        .header(bearer(&token))
        .body(serde_json::json!({"last_read_internal_id": newest}).to_string())
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["ok"], true);

    let res = client
        .get("/api/v1/notifications")
        .header(bearer(&token))
        .dispatch();
    let ack: serde_json::Value = res.into_json().unwrap();
    assert_eq!(ack["data"]["last_read_internal_id"], newest);
}
