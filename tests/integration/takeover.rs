use crate::common::*;
use helpline_chat::events::{self, Topic};
use helpline_chat::models::{MSG_TYPE_SYSTEM, ROLE_ADMIN, ROLE_AGENT, ROLE_SUPERVISOR};
use helpline_chat::rooms::RoomStore;
use helpline_chat::sessions::SessionRegistry;

#[test]
fn supervisor_takes_over_one_to_one_chat() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0, "max_staffs_in_chat": 1}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "help"}));

    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let agent_token = staff_token(&client, &agent);
    let agent_sid = connect_ok(&client, &agent_token);
    emit(&client, &agent_token, &agent_sid, "staff_join", serde_json::json!({"visitor": visitor.id}));

    let sup = seed_staff(&client, ROLE_SUPERVISOR, "sup@example.org");
    let sup_token = staff_token(&client, &sup);
    let sup_sid = connect_ok(&client, &sup_token);

    let mut probe = probe(&client);
    let ack = emit(&client, &sup_token, &sup_sid, "take_over_chat", serde_json::json!({"visitor": visitor.id}));
    assert_eq!(ack["ok"], true, "take over failed: {ack}");

    // The supervisor replaced the agent entirely.
    let rooms = client.rocket().state::<RoomStore>().unwrap();
    assert_eq!(rooms.snapshot(&visitor.id).unwrap().staff_ids(), vec![sup.id.clone()]);

    // The agent's connection left the room topic.
    let registry = client.rocket().state::<SessionRegistry>().unwrap();
    assert!(!registry.is_member(&agent_sid, &Topic::Room(visitor.id.clone())));
    assert!(registry.is_member(&sup_sid, &Topic::Room(visitor.id.clone())));

    // System message: take over room, authored by the supervisor.
    with_db(&client, |conn| {
        let (sender, content): (String, String) = conn
            .query_row(
                "SELECT sender_staff_id, content FROM chat_messages
                 WHERE type_id = ?1 ORDER BY sequence_num DESC LIMIT 1",
                [MSG_TYPE_SYSTEM],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(sender, sup.id);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&content).unwrap(),
            serde_json::json!({"content": "take over room"})
        );
    });

    let envelopes = probe.drain();
    let took = envelopes
        .iter()
        .find(|e| e.name == events::STAFF_TAKE_OVER_CHAT)
        .expect("monitor announcement");
    assert_eq!(took.topic, Topic::Monitor(org));
    assert_eq!(count_events(&envelopes, events::STAFF_BEING_TAKEN_OVER_CHAT), 1);
}

#[test]
fn take_over_in_larger_rooms_joins_and_still_announces() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0, "max_staffs_in_chat": 3}));
    let org = org_id(&client);
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "help"}));

    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let agent_token = staff_token(&client, &agent);
    let agent_sid = connect_ok(&client, &agent_token);
    emit(&client, &agent_token, &agent_sid, "staff_join", serde_json::json!({"visitor": visitor.id}));

    let sup = seed_staff(&client, ROLE_SUPERVISOR, "sup@example.org");
    let sup_token = staff_token(&client, &sup);
    let sup_sid = connect_ok(&client, &sup_token);

    let mut probe = probe(&client);
    let ack = emit(&client, &sup_token, &sup_sid, "take_over_chat", serde_json::json!({"visitor": visitor.id}));
    assert_eq!(ack["ok"], true);

    // Both staffs serve the chat now.
    let rooms = client.rocket().state::<RoomStore>().unwrap();
    let mut staffs = rooms.snapshot(&visitor.id).unwrap().staff_ids();
    staffs.sort();
    let mut expected = vec![agent.id.clone(), sup.id.clone()];
    expected.sort();
    assert_eq!(staffs, expected);

    // The monitor room still hears about it.
    let envelopes = probe.drain();
    let took = envelopes
        .iter()
        .find(|e| e.name == events::STAFF_TAKE_OVER_CHAT)
        .expect("monitor announcement");
    assert_eq!(took.topic, Topic::Monitor(org));
}

#[test]
fn supervisor_cannot_take_over_admin_chat() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0, "max_staffs_in_chat": 1}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let vsid = connect_ok(&client, &vtoken);
    emit(&client, &vtoken, &vsid, "visitor_first_msg", serde_json::json!({"value": "help"}));

    let admin = seed_staff(&client, ROLE_ADMIN, "admin@example.org");
    let admin_token = staff_token(&client, &admin);
    let admin_sid = connect_ok(&client, &admin_token);
    emit(&client, &admin_token, &admin_sid, "staff_join", serde_json::json!({"visitor": visitor.id}));

    let sup = seed_staff(&client, ROLE_SUPERVISOR, "sup@example.org");
    let sup_token = staff_token(&client, &sup);
    let sup_sid = connect_ok(&client, &sup_token);
    let ack = emit(&client, &sup_token, &sup_sid, "take_over_chat", serde_json::json!({"visitor": visitor.id}));
    assert_eq!(ack["ok"], false);

    let rooms = client.rocket().state::<RoomStore>().unwrap();
    assert_eq!(rooms.snapshot(&visitor.id).unwrap().staff_ids(), vec![admin.id.clone()]);
}

#[test]
fn agent_cannot_take_over() {
    let client = test_client();
    configure(&client, serde_json::json!({"auto_assign": 0}));
    let visitor = seed_visitor(&client, "vera");
    let vtoken = visitor_token(&client, &visitor);
    let _vsid = connect_ok(&client, &vtoken);

    let agent = seed_staff(&client, ROLE_AGENT, "agent1@example.org");
    let token = staff_token(&client, &agent);
    let sid = connect_ok(&client, &token);
    let ack = emit(&client, &token, &sid, "take_over_chat", serde_json::json!({"visitor": visitor.id}));
    assert_eq!(ack["ok"], false);
}
