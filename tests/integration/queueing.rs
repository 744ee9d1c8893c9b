use crate::common::*;
use helpline_chat::db;
use helpline_chat::events::{self, Topic};
use helpline_chat::models::{ROLE_AGENT, MSG_TYPE_SYSTEM, MSG_TYPE_USER};
use helpline_chat::queues::QueueIndex;
use helpline_chat::rooms::RoomStore;

#[test]
fn first_message_creates_queue_entry() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let token = visitor_token(&client, &visitor);

    let sid = connect_ok(&client, &token);
    let mut probe = probe(&client);

    let ack = emit(&client, &token, &sid, "visitor_first_msg", serde_json::json!({"value": "hi"}));
    assert_eq!(ack["ok"], true);

    // One persisted message: seq 1, no staff sender, the literal content.
    with_db(&client, |conn| {
        let (count, seq, type_id, sender, content): (i64, i64, i64, Option<String>, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(sequence_num), MAX(type_id),
                        MAX(sender_staff_id), MAX(content) FROM chat_messages",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(seq, 1);
        assert_eq!(type_id, MSG_TYPE_USER);
        assert_eq!(sender, None);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&content).unwrap(),
            serde_json::json!({"value": "hi"})
        );
    });

    // The visitor sits in online-unclaimed with the message bundled.
    let queues = client.rocket().state::<QueueIndex>().unwrap();
    let bundle = queues
        .online_list(&org)
        .into_iter()
        .find(|b| b.visitor.id == visitor.id)
        .expect("visitor queued");
    assert_eq!(bundle.contents, vec![serde_json::json!({"value": "hi"})]);

    // Org staffs were told about the new unclaimed chat.
    let envelopes = probe.drain();
    let appended: Vec<_> = envelopes
        .iter()
        .filter(|e| e.name == events::APPEND_UNCLAIMED_CHATS)
        .collect();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].topic, Topic::Org(org.clone()));
    assert_eq!(appended[0].payload["visitor"]["id"], visitor.id.as_str());
}

#[test]
fn claim_removes_from_queue() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let stoken = staff_token(&client, &agent);

    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "hi"}));

    let ssid = connect_ok(&client, &stoken);
    let mut probe = probe(&client);
    let ack = emit(&client, &stoken, &ssid, "staff_join", serde_json::json!({"visitor": visitor.id}));
    assert_eq!(ack["ok"], true, "claim failed: {ack}");

    // Queue cleared on both layers.
    let queues = client.rocket().state::<QueueIndex>().unwrap();
    assert!(!queues.online_contains(&org, &visitor.id));
    with_db(&client, |conn| {
        assert!(!db::unclaimed_contains(conn, &visitor.id));
    });

    // Live room holds exactly the claimer.
    let rooms = client.rocket().state::<RoomStore>().unwrap();
    let snap = rooms.snapshot(&visitor.id).expect("live room");
    assert_eq!(snap.staff_ids(), vec![agent.id.clone()]);

    // A "join room" system message took the next sequence slot.
    with_db(&client, |conn| {
        let (seq, type_id, sender, content): (i64, i64, String, String) = conn
            .query_row(
                "SELECT sequence_num, type_id, sender_staff_id, content FROM chat_messages
                 WHERE type_id = ?1",
                [MSG_TYPE_SYSTEM],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!(seq, 2);
        assert_eq!(type_id, MSG_TYPE_SYSTEM);
        assert_eq!(sender, agent.id);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&content).unwrap(),
            serde_json::json!({"content": "join room"})
        );
    });

    let envelopes = probe.drain();
    assert_eq!(count_events(&envelopes, events::STAFF_CLAIM_CHAT), 1);
    let claim = envelopes.iter().find(|e| e.name == events::STAFF_CLAIM_CHAT).unwrap();
    assert_eq!(claim.topic, Topic::Org(org));
    let join = envelopes.iter().find(|e| e.name == events::STAFF_JOIN_ROOM).unwrap();
    assert_eq!(join.topic, Topic::Room(visitor.id.clone()));
}

#[test]
fn second_claim_is_rejected_at_capacity_one() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let a1 = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let a2 = seed_staff(&client, ROLE_AGENT, "agent2@example.org");

    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "hi"}));

    let t1 = staff_token(&client, &a1);
    let s1 = connect_ok(&client, &t1);
    emit(&client, &t1, &s1, "staff_join", serde_json::json!({"visitor": visitor.id}));

    let t2 = staff_token(&client, &a2);
    let s2 = connect_ok(&client, &t2);
    let ack = emit(&client, &t2, &s2, "staff_join", serde_json::json!({"visitor": visitor.id}));
    assert_eq!(ack["ok"], false);
    assert_eq!(ack["error"], "This chat is already claimed.");
}

#[test]
fn visitor_disconnect_moves_queue_entry_offline() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let token = visitor_token(&client, &visitor);

    let sid = connect_ok(&client, &token);
    emit(&client, &token, &sid, "visitor_first_msg", serde_json::json!({"value": "hi"}));

    let mut probe1 = probe(&client);
    emit_empty(&client, &token, &sid, "disconnect_request");

    let queues = client.rocket().state::<QueueIndex>().unwrap();
    assert!(!queues.online_contains(&org, &visitor.id));
    with_db(&client, |conn| {
        assert!(db::unclaimed_contains(conn, &visitor.id));
    });
    let envelopes = probe1.drain();
    assert_eq!(count_events(&envelopes, events::UNCLAIMED_CHAT_TO_OFFLINE), 1);
    assert_eq!(count_events(&envelopes, events::VISITOR_GOES_OFFLINE), 2);

    // Reconnect pulls the chat back into the online queue with its history.
    let mut probe2 = probe(&client);
    let _sid = connect_ok(&client, &token);
    assert!(queues.online_contains(&org, &visitor.id));
    with_db(&client, |conn| {
        assert!(!db::unclaimed_contains(conn, &visitor.id));
    });
    let bundle = queues
        .online_list(&org)
        .into_iter()
        .find(|b| b.visitor.id == visitor.id)
        .unwrap();
    assert_eq!(bundle.contents, vec![serde_json::json!({"value": "hi"})]);
    let envelopes = probe2.drain();
    assert_eq!(count_events(&envelopes, events::REMOVE_VISITOR_OFFLINE_CHAT), 1);
    assert_eq!(count_events(&envelopes, events::APPEND_UNCLAIMED_CHATS), 1);
}

#[test]
fn visitor_leave_room_clears_queue_and_closes_room() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let token = visitor_token(&client, &visitor);

    let sid = connect_ok(&client, &token);
    emit(&client, &token, &sid, "visitor_first_msg", serde_json::json!({"value": "hi"}));

    let mut probe = probe(&client);
    let ack = emit_empty(&client, &token, &sid, "visitor_leave_room");
    assert_eq!(ack["ok"], true);

    let queues = client.rocket().state::<QueueIndex>().unwrap();
    assert!(!queues.online_contains(&org, &visitor.id));
    let rooms = client.rocket().state::<RoomStore>().unwrap();
    assert!(rooms.snapshot(&visitor.id).is_none());

    let envelopes = probe.drain();
    assert_eq!(count_events(&envelopes, events::VISITOR_LEAVE_QUEUE), 1);
    assert_eq!(count_events(&envelopes, events::VISITOR_LEAVE_CHAT_FOR_SUPERVISOR), 1);
}

#[test]
fn unclaimed_messages_accumulate_in_bundle() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let token = visitor_token(&client, &visitor);

    let sid = connect_ok(&client, &token);
    emit(&client, &token, &sid, "visitor_first_msg", serde_json::json!({"value": "one"}));
    let mut probe = probe(&client);
    emit(&client, &token, &sid, "visitor_msg_unclaimed", serde_json::json!({"value": "two"}));
    emit(&client, &token, &sid, "visitor_msg_unclaimed", serde_json::json!({"value": "three"}));

    let queues = client.rocket().state::<QueueIndex>().unwrap();
    let bundle = queues
        .online_list(&org)
        .into_iter()
        .find(|b| b.visitor.id == visitor.id)
        .unwrap();
    assert_eq!(bundle.contents.len(), 3);

    let envelopes = probe.drain();
    assert_eq!(count_events(&envelopes, events::VISITOR_UNCLAIMED_MSG), 2);

    // Sequence numbers stayed strictly increasing.
    with_db(&client, |conn| {
        let seqs: Vec<i64> = {
            let mut stmt = conn
                .prepare("SELECT sequence_num FROM chat_messages ORDER BY sequence_num ASC")
                .unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.filter_map(|r| r.ok()).collect()
        };
        assert_eq!(seqs, vec![1, 2, 3]);
    });
}
