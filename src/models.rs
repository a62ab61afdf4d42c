//! Data models for ChatHub Server
//!
//! Everything here crosses a serialization boundary: the entities live
//! in the persisted state document, the command/event enums are the
//! WebSocket wire protocol. Wire and disk field names are camelCase.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ============================================================================
// User Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub is_online: bool,
    /// ms epoch
    #[serde(default)]
    pub last_seen: i64,
    #[serde(default)]
    pub is_deleted: bool,
    /// Present on disk for every user; stripped from every wire payload
    /// except the owner's own `register_success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_code: Option<String>,
}

impl User {
    /// Copy of this user safe to send to anyone: recovery code stripped.
    pub fn public_view(&self) -> User {
        User {
            recovery_code: None,
            ..self.clone()
        }
    }

    /// Display name if set, username otherwise
    pub fn label(&self) -> &str {
        if self.display_name.trim().is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }
}

// ============================================================================
// Message Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

/// A single user's reaction to a message. At most one per user per
/// message. `oderId` is a historical alias of `userId` found in old
/// state documents; it is accepted on input and never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    #[serde(alias = "oderId")]
    pub user_id: String,
    pub emoji: String,
}

/// Old state documents store reactions as a `userId -> emoji` map; the
/// canonical form is the array. Accept both, canonicalize to the array.
fn deserialize_reactions<'de, D>(deserializer: D) -> Result<Vec<Reaction>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Legacy {
        List(Vec<Reaction>),
        Map(BTreeMap<String, String>),
    }

    Ok(match Legacy::deserialize(deserializer)? {
        Legacy::List(reactions) => reactions,
        Legacy::Map(map) => map
            .into_iter()
            .map(|(user_id, emoji)| Reaction { user_id, emoji })
            .collect(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<Value>,
    /// ms epoch
    pub timestamp: i64,
    pub status: MessageStatus,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default, deserialize_with = "deserialize_reactions")]
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_from: Option<Value>,
    /// ms epoch
    pub timestamp: i64,
    #[serde(default, deserialize_with = "deserialize_reactions")]
    pub reactions: Vec<Reaction>,
    /// Member IDs that have seen this message; includes the sender
    #[serde(default)]
    pub seen_by: Vec<String>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_system: bool,
}

// ============================================================================
// Chat and Group Models
// ============================================================================

/// One side's view of a direct chat. The last message is stored by ID
/// so both endpoints reference the same record; wire views embed the
/// resolved message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    /// ms epoch
    #[serde(default)]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar: String,
    pub creator_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    /// Always contains the creator
    #[serde(default)]
    pub admins: Vec<String>,
    /// ms epoch
    pub created_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub unread_counts: BTreeMap<String, u32>,
    /// Insertion-ordered
    #[serde(default)]
    pub pinned_message_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
}

impl Group {
    pub fn is_member(&self, user_id: &str) -> bool {
        self.member_ids.iter().any(|m| m == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.creator_id == user_id || self.admins.iter().any(|a| a == user_id)
    }
}

// ============================================================================
// Wire Views
// ============================================================================

/// A chat endpoint as sent to its owner, with the last message resolved
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub chat_id: String,
    pub partner_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<DirectMessage>,
    pub unread_count: u32,
    pub updated_at: i64,
}

/// A group as sent on the wire, with the last message resolved
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub avatar: String,
    pub creator_id: String,
    pub member_ids: Vec<String>,
    pub admins: Vec<String>,
    pub created_at: i64,
    pub unread_counts: BTreeMap<String, u32>,
    pub pinned_message_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<GroupMessage>,
}

/// Full per-user state pushed in `register_success` / `login_success`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub user: User,
    pub users: Vec<User>,
    /// partnerId -> chat view
    pub chats: BTreeMap<String, ChatView>,
    pub groups: Vec<GroupView>,
    /// chatId -> messages, for chats involving the user
    pub messages: BTreeMap<String, Vec<DirectMessage>>,
    /// groupId -> messages, for groups containing the user
    pub group_messages: BTreeMap<String, Vec<GroupMessage>>,
    pub blocked: Vec<String>,
    pub blocked_by: Vec<String>,
    pub pinned_chats: Vec<String>,
    /// chatId -> pinned message IDs, the user's own map
    pub pinned_messages: BTreeMap<String, Vec<String>>,
    pub online_user_ids: Vec<String>,
}

/// One `sent -> delivered` promotion in a login catch-up batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredRef {
    pub message_id: String,
    pub chat_id: String,
}

// ============================================================================
// Inbound Payloads
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterData {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageIn {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<Value>,
    #[serde(default)]
    pub forwarded_from: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageIn {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub reply_to: Option<Value>,
    #[serde(default)]
    pub forwarded_from: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

// ============================================================================
// Wire Protocol: Inbound Commands
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    Register {
        user: RegisterData,
    },
    Login {
        user_id: String,
    },
    LoginRecovery {
        recovery_code: String,
    },
    CheckUsername {
        username: String,
    },
    SearchUser {
        query: String,
    },
    SendMessage {
        message: DirectMessageIn,
    },
    ForwardMessage {
        message: DirectMessageIn,
    },
    EditMessage {
        chat_id: String,
        message_id: String,
        new_text: String,
    },
    DeleteMessage {
        chat_id: String,
        message_ids: Vec<String>,
    },
    MarkSeen {
        chat_id: String,
        user_id: String,
        partner_id: String,
    },
    MarkMessagesSeen {
        chat_id: String,
        user_id: String,
        partner_id: String,
        message_ids: Vec<String>,
    },
    Typing {
        user_id: String,
        partner_id: String,
        is_typing: bool,
    },
    UpdateProfile {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
        #[serde(default)]
        bio: Option<String>,
    },
    DeleteAccount {},
    BlockUser {
        user_id: String,
        is_blocked: bool,
    },
    PinChat {
        partner_id: String,
        is_pinned: bool,
    },
    DeleteChat {
        chat_id: String,
        partner_id: String,
    },
    PinMessage {
        chat_id: String,
        message_id: String,
        is_pinned: bool,
        actor_id: String,
    },
    AddReaction {
        chat_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    CreateGroup {
        group: CreateGroupData,
    },
    SendGroupMessage {
        message: GroupMessageIn,
    },
    ForwardGroupMessage {
        message: GroupMessageIn,
    },
    MarkGroupSeen {
        group_id: String,
        user_id: String,
    },
    MarkGroupMessagesSeen {
        group_id: String,
        user_id: String,
        message_ids: Vec<String>,
    },
    EditGroupMessage {
        group_id: String,
        message_id: String,
        new_text: String,
    },
    DeleteGroupMessage {
        group_id: String,
        message_id: String,
    },
    PinGroupMessage {
        group_id: String,
        message_id: String,
        is_pinned: bool,
    },
    AddGroupMember {
        group_id: String,
        user_id: String,
    },
    RemoveGroupMember {
        group_id: String,
        user_id: String,
    },
    SetGroupAdmin {
        group_id: String,
        user_id: String,
        is_admin: bool,
    },
    AddGroupReaction {
        group_id: String,
        message_id: String,
        user_id: String,
        emoji: String,
    },
    GroupTyping {
        group_id: String,
        user_id: String,
        is_typing: bool,
    },
    Heartbeat {},
}

// ============================================================================
// Wire Protocol: Outbound Events
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Connected {},
    RegisterSuccess(Box<Snapshot>),
    RegisterError {
        reason: String,
    },
    LoginSuccess(Box<Snapshot>),
    LoginError {
        reason: String,
    },
    UsernameCheckResult {
        username: String,
        available: bool,
    },
    SearchResult {
        users: Vec<User>,
    },
    UserJoined {
        user: User,
        online_user_ids: Vec<String>,
    },
    UserOnline {
        user_id: String,
        online_user_ids: Vec<String>,
    },
    UserOffline {
        user_id: String,
        last_seen: i64,
        online_user_ids: Vec<String>,
    },
    UserUpdated {
        user: User,
    },
    UserDeleted {
        user_id: String,
    },
    MessageSent {
        message: DirectMessage,
    },
    NewMessage {
        message: DirectMessage,
    },
    MessageDelivered {
        chat_id: String,
        message_id: String,
    },
    MessageEdited {
        chat_id: String,
        message: DirectMessage,
    },
    MessageDeleted {
        chat_id: String,
        message_ids: Vec<String>,
        pinned_message_ids: Vec<String>,
    },
    MessagesSeen {
        chat_id: String,
        seen_by: String,
    },
    SpecificMessagesSeen {
        chat_id: String,
        message_ids: Vec<String>,
        seen_by: String,
    },
    ChatUnreadUpdated {
        chat_id: String,
        unread_count: u32,
    },
    UnreadCleared {
        chat_id: String,
    },
    MessagesBatchDelivered {
        messages: Vec<DeliveredRef>,
    },
    MessagePinned {
        chat_id: String,
        message_id: String,
        is_pinned: bool,
        pinned_message_ids: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        system_message: Option<DirectMessage>,
    },
    ReactionUpdated {
        chat_id: String,
        message_id: String,
        reactions: Vec<Reaction>,
    },
    ChatPinned {
        pinned_chats: Vec<String>,
    },
    ChatDeleted {
        chat_id: String,
    },
    UserBlocked {
        user_id: String,
        is_blocked: bool,
        blocked: Vec<String>,
    },
    YouWereBlocked {
        user_id: String,
        is_blocked: bool,
        blocked_by: Vec<String>,
    },
    ProfileUpdated {
        user: User,
    },
    ProfileError {
        reason: String,
    },
    AccountDeleted {},
    MessageBlocked {
        receiver_id: String,
        reason: String,
    },
    GroupCreated {
        group: GroupView,
    },
    /// `group: null` tells the recipient they were removed
    GroupUpdated {
        group: Option<GroupView>,
    },
    NewGroupMessage {
        message: GroupMessage,
        group: GroupView,
    },
    GroupMessageSent {
        message: GroupMessage,
        group: GroupView,
    },
    GroupMessageEdited {
        group_id: String,
        message: GroupMessage,
    },
    GroupMessageDeleted {
        group_id: String,
        message_id: String,
        group: GroupView,
    },
    GroupUnreadUpdated {
        group_id: String,
        unread_count: u32,
    },
    GroupMessagesSeen {
        group_id: String,
        message_ids: Vec<String>,
        seen_by: String,
    },
    GroupMessagePinned {
        group: GroupView,
        message_id: String,
        is_pinned: bool,
    },
    GroupReactionUpdated {
        group_id: String,
        message_id: String,
        reactions: Vec<Reaction>,
    },
    GroupUserTyping {
        group_id: String,
        user_id: String,
        is_typing: bool,
    },
    UserTyping {
        user_id: String,
        is_typing: bool,
    },
    HeartbeatAck {},
}

/// ms epoch, the timestamp unit used everywhere
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
