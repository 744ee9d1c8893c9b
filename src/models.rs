use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Staff roles ---
//
// Numerically lower id = higher authority.
pub const ROLE_ADMIN: i64 = 1;
pub const ROLE_SUPERVISOR: i64 = 2;
pub const ROLE_AGENT: i64 = 3;

/// Supervisors and admins monitor every chat in their organisation.
pub fn is_high_up(role_id: i64) -> bool {
    role_id < ROLE_AGENT
}

/// Actions gated by role. This table is the single authority for role
/// checks, including settings writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffAction {
    ClaimChat,
    ManageStaffsInChat,
    TakeOverChat,
    ModifyGlobalSettings,
    DisableStaff,
}

pub fn role_permits(role_id: i64, action: StaffAction) -> bool {
    match action {
        StaffAction::ClaimChat => role_id <= ROLE_AGENT,
        StaffAction::ManageStaffsInChat | StaffAction::TakeOverChat => role_id <= ROLE_SUPERVISOR,
        StaffAction::ModifyGlobalSettings | StaffAction::DisableStaff => role_id == ROLE_ADMIN,
    }
}

// --- Persistent entities ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Organisation {
    pub id: String,
    pub name: String,
    pub disabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Staff {
    pub id: String,
    pub org_id: String,
    pub role_id: i64,
    pub email: String,
    pub display_name: String,
    pub full_name: String,
    pub disabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Visitor {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_anonymous: bool,
    pub disabled: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Chat {
    pub id: String,
    pub visitor_id: String,
    pub severity_level: i64,
    pub tags: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

pub const MSG_TYPE_SYSTEM: i64 = 0;
pub const MSG_TYPE_USER: i64 = 1;

/// `type_id`: 0 = system message, 1 = user message.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sequence_num: i64,
    pub type_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_staff_id: Option<String>,
    pub content: serde_json::Value,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StaffNotification {
    pub internal_id: i64,
    pub staff_id: String,
    pub content: serde_json::Value,
    pub created_at: String,
}

// --- Ephemeral presence / queue shapes ---

/// One staff inside a live room. `sid` is the staff's live connection if any;
/// the subscription itself is durable regardless.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomStaff {
    pub staff: Staff,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// Authoritative live state of one visitor's room.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoomSnapshot {
    pub chat: Chat,
    pub visitor: Visitor,
    /// Next sequence number to hand out. Always exceeds the max persisted
    /// sequence_num for this chat.
    pub sequence_num: i64,
    pub severity_level: i64,
    /// Keyed by staff_id.
    pub staffs: HashMap<String, RoomStaff>,
}

impl RoomSnapshot {
    pub fn staff_ids(&self) -> Vec<String> {
        self.staffs.keys().cloned().collect()
    }
}

/// Online-unclaimed queue entry: the visitor plus every message they sent
/// while nobody was assigned.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnclaimedBundle {
    pub visitor: Visitor,
    pub room: Chat,
    pub contents: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OfflineUnclaimedEntry {
    pub visitor: Visitor,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FlaggedEntry {
    pub visitor: Visitor,
    pub flag_message: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OnlineStaffEntry {
    pub staff: Staff,
    pub sid: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OnlineVisitorEntry {
    pub visitor: Visitor,
    pub room_id: String,
}

// --- Structured acks ---

/// Every realtime event handler answers with one of these; domain failures
/// never surface as HTTP errors.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Ack {
    pub fn ok() -> Self {
        Ack { ok: true, error: None, data: None }
    }

    pub fn ok_with(data: serde_json::Value) -> Self {
        Ack { ok: true, error: None, data: Some(data) }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Ack { ok: false, error: Some(message.into()), data: None }
    }

    pub fn err_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Ack { ok: false, error: Some(message.into()), data: Some(data) }
    }
}

// --- Client-to-server payloads ---

#[derive(Debug, Deserialize)]
pub struct VisitorTargetPayload {
    pub visitor: String,
}

#[derive(Debug, Deserialize)]
pub struct StaffMsgPayload {
    pub visitor: String,
    pub content: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SingleStaffPayload {
    pub visitor: String,
    pub staff: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceStaffsPayload {
    pub visitor: String,
    pub staffs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePriorityPayload {
    pub visitor: String,
    pub severity_level: i64,
    #[serde(default)]
    pub flag_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarkSeenPayload {
    pub last_seen_msg_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NotificationsReadPayload {
    pub last_read_internal_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SetDisabledPayload {
    pub disabled: bool,
}

// --- Init payloads ---

#[derive(Debug, Serialize, Deserialize)]
pub struct StaffInit {
    pub sid: String,
    pub unclaimed_chats: Vec<UnclaimedBundle>,
    pub offline_unclaimed_chats: Vec<OfflineUnclaimedEntry>,
    pub online_users: Vec<OnlineStaffEntry>,
    pub online_visitors: Vec<OnlineVisitorEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VisitorInit {
    pub sid: String,
    pub room: Chat,
    pub staffs: Vec<Staff>,
    pub online_staffs: Vec<OnlineStaffEntry>,
}
