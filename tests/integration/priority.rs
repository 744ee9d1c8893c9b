use crate::common::*;
use helpline_chat::db;
use helpline_chat::events::{self, Topic};
use helpline_chat::models::{ROLE_AGENT, ROLE_SUPERVISOR};

#[test]
fn raising_severity_flags_the_chat() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "help"}));

    let sup = seed_staff(&client, ROLE_SUPERVISOR, "sup@example.org");
    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let stoken = staff_token(&client, &agent);
    let ssid = connect_ok(&client, &stoken);
    emit(&client, &stoken, &ssid, "staff_join", serde_json::json!({"visitor": visitor.id}));

    let mut probe = probe(&client);
    let ack = emit(
        &client,
        &stoken,
        &ssid,
        "change_chat_priority",
        serde_json::json!({"visitor": visitor.id, "severity_level": 3, "flag_message": "self-harm risk"}),
    );
    assert_eq!(ack["ok"], true);

    with_db(&client, |conn| {
        assert!(db::flagged_contains(conn, &visitor.id));
        let flagged = db::flagged_slice(conn, 0, 10);
        assert_eq!(flagged[0].flag_message, "self-harm risk");
        let severity: i64 = conn
            .query_row(
                "SELECT severity_level FROM chats WHERE visitor_id = ?1",
                [&visitor.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(severity, 3);
        // High-ups got an in-app notification; the agent did not.
        assert_eq!(db::notifications_for_staff(conn, &sup.id, 10).len(), 1);
        assert_eq!(db::notifications_for_staff(conn, &agent.id, 10).len(), 0);
    });

    let envelopes = probe.drain();
    let changed = envelopes
        .iter()
        .find(|e| e.name == events::CHAT_HAS_CHANGED_PRIORITY_FOR_SUPERVISOR)
        .expect("monitor fan-out");
    assert_eq!(changed.topic, Topic::Monitor(org));
    assert_eq!(changed.payload["severity_level"], 3);
}

#[test]
fn clearing_severity_unflags_the_chat() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "help"}));

    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let stoken = staff_token(&client, &agent);
    let ssid = connect_ok(&client, &stoken);
    emit(&client, &stoken, &ssid, "staff_join", serde_json::json!({"visitor": visitor.id}));

    emit(
        &client,
        &stoken,
        &ssid,
        "change_chat_priority",
        serde_json::json!({"visitor": visitor.id, "severity_level": 2}),
    );
    with_db(&client, |conn| {
        assert!(db::flagged_contains(conn, &visitor.id));
    });

    let ack = emit(
        &client,
        &stoken,
        &ssid,
        "change_chat_priority",
        serde_json::json!({"visitor": visitor.id, "severity_level": 0}),
    );
    assert_eq!(ack["ok"], true);
    with_db(&client, |conn| {
        assert!(!db::flagged_contains(conn, &visitor.id));
        let severity: i64 = conn
            .query_row(
                "SELECT severity_level FROM chats WHERE visitor_id = ?1",
                [&visitor.id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(severity, 0);
    });
}

#[test]
fn negative_severity_is_rejected() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let stoken = staff_token(&client, &agent);
    let ssid = connect_ok(&client, &stoken);

    let ack = emit(
        &client,
        &stoken,
        &ssid,
        "change_chat_priority",
        serde_json::json!({"visitor": visitor.id, "severity_level": -1}),
    );
    assert_eq!(ack["ok"], false);
    assert!(ack["error"].as_str().unwrap().contains("severity_level"));
}

#[test]
fn typing_relay_is_deduplicated() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);

    let mut probe1 = probe(&client);
    for _ in 0..3 {
        let ack = emit(
            &client,
            &vtoken,
            &vsid,
            "user_typing_send",
            serde_json::json!({"visitor": visitor.id}),
        );
        assert_eq!(ack["ok"], true);
    }
    let envelopes = probe1.drain();
    // Burst collapses to a single relay inside the 2s window.
    assert_eq!(count_events(&envelopes, events::USER_TYPING_RECEIVE), 1);

    let mut probe2 = probe(&client);
    emit(
        &client,
        &vtoken,
        &vsid,
        "user_stop_typing_send",
        serde_json::json!({"visitor": visitor.id}),
    );
    let envelopes = probe2.drain();
    assert_eq!(count_events(&envelopes, events::USER_STOP_TYPING_RECEIVE), 1);
}
