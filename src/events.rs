use tokio::sync::broadcast;

// Server-to-client event names.
pub const VISITOR_INIT: &str = "visitor_init";
pub const STAFF_INIT: &str = "staff_init";
pub const STAFF_GOES_ONLINE: &str = "staff_goes_online";
pub const STAFF_GOES_OFFLINE: &str = "staff_goes_offline";
pub const VISITOR_GOES_ONLINE: &str = "visitor_goes_online";
pub const VISITOR_GOES_OFFLINE: &str = "visitor_goes_offline";
pub const APPEND_UNCLAIMED_CHATS: &str = "append_unclaimed_chats";
pub const VISITOR_UNCLAIMED_MSG: &str = "visitor_unclaimed_msg";
pub const REMOVE_VISITOR_OFFLINE_CHAT: &str = "remove_visitor_offline_chat";
pub const UNCLAIMED_CHAT_TO_OFFLINE: &str = "unclaimed_chat_to_offline";
pub const STAFF_CLAIM_CHAT: &str = "staff_claim_chat";
pub const STAFF_JOIN_ROOM: &str = "staff_join_room";
pub const STAFF_LEAVE: &str = "staff_leave";
pub const VISITOR_SEND: &str = "visitor_send";
pub const STAFF_SEND: &str = "staff_send";
pub const VISITOR_LEAVE_QUEUE: &str = "visitor_leave_queue";
pub const NO_STAFF_LEFT: &str = "no_staff_left";
pub const STAFF_BEING_ADDED_TO_CHAT: &str = "staff_being_added_to_chat";
pub const STAFF_BEING_REMOVED_FROM_CHAT: &str = "staff_being_removed_from_chat";
pub const STAFF_BEING_TAKEN_OVER_CHAT: &str = "staff_being_taken_over_chat";
pub const STAFF_TAKE_OVER_CHAT: &str = "staff_take_over_chat";
pub const AGENT_NEW_CHAT: &str = "agent_new_chat";
pub const STAFF_AUTO_ASSIGNED_CHAT: &str = "staff_auto_assigned_chat";
pub const NEW_VISITOR_MSG_FOR_SUPERVISOR: &str = "new_visitor_msg_for_supervisor";
pub const NEW_STAFF_MSG_FOR_SUPERVISOR: &str = "new_staff_msg_for_supervisor";
pub const CHAT_HAS_CHANGED_PRIORITY_FOR_SUPERVISOR: &str = "chat_has_changed_priority_for_supervisor";
pub const STAFF_HANDLED_CHAT_FOR_SUPERVISOR: &str = "staff_handled_chat_for_supervisor";
pub const STAFF_LEAVE_CHAT_FOR_SUPERVISOR: &str = "staff_leave_chat_for_supervisor";
pub const VISITOR_LEAVE_CHAT_FOR_SUPERVISOR: &str = "visitor_leave_chat_for_supervisor";
pub const STAFFS_IN_CHAT_CHANGED: &str = "staffs_in_chat_changed";
pub const USER_TYPING_RECEIVE: &str = "user_typing_receive";
pub const USER_STOP_TYPING_RECEIVE: &str = "user_stop_typing_receive";
pub const VISITOR_ROOM_EXISTS: &str = "visitor_room_exists";
pub const VISITOR_LEAVE: &str = "visitor_leave";

/// Fan-out audiences. Delivery reaches every live session currently joined
/// to the topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Both sides of a chat plus subscribed staffs: `room:{visitor_id}`.
    Room(String),
    /// All connected staff of an organisation: `org:{org_id}`.
    Org(String),
    /// Supervisors and admins of an organisation: `monitor:{org_id}`.
    Monitor(String),
    /// A single connection: `sid:{sid}`.
    Sid(String),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub topic: Topic,
    pub name: &'static str,
    pub payload: serde_json::Value,
    pub skip_sid: Option<String>,
}

#[derive(Clone)]
pub struct EventBus {
    pub sender: broadcast::Sender<Envelope>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    /// Publish to everyone joined to `topic`. Send errors (no subscribers)
    /// are ignored; a lost fan-out never rolls back committed state.
    pub fn publish(&self, topic: Topic, name: &'static str, payload: serde_json::Value) {
        let _ = self.sender.send(Envelope { topic, name, payload, skip_sid: None });
    }

    /// Publish, excluding the originating connection.
    pub fn publish_skip(
        &self,
        topic: Topic,
        name: &'static str,
        payload: serde_json::Value,
        skip_sid: &str,
    ) {
        let _ = self.sender.send(Envelope {
            topic,
            name,
            payload,
            skip_sid: Some(skip_sid.to_string()),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}
