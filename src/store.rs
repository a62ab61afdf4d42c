//! State document storage for ChatHub Server
//!
//! The whole conversation graph lives in one in-memory document and is
//! mirrored to a single JSON file after every mutating command. Maps are
//! `BTreeMap` so serialization order is deterministic: reloading a flushed
//! document and flushing again produces identical bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::models::*;

/// Canonical direct-chat identifier: the two participant IDs sorted and
/// joined with `:`. A self-chat is `id:id`.
pub fn direct_chat_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

// ============================================================================
// State Document
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    pub users: BTreeMap<String, User>,
    /// chatId -> messages, append-ordered
    pub messages: BTreeMap<String, Vec<DirectMessage>>,
    /// ownerId -> partnerId -> endpoint
    pub chats: BTreeMap<String, BTreeMap<String, ChatEndpoint>>,
    pub groups: BTreeMap<String, Group>,
    /// groupId -> messages, append-ordered
    pub group_messages: BTreeMap<String, Vec<GroupMessage>>,
    /// blockerId -> blocked IDs; mirror of `blocked_by`
    pub blocked: BTreeMap<String, Vec<String>>,
    pub blocked_by: BTreeMap<String, Vec<String>>,
    /// userId -> pinned partner IDs, insertion-ordered
    pub pinned_chats: BTreeMap<String, Vec<String>>,
    /// userId -> chatId -> pinned message IDs
    pub pinned_messages: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl State {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Case-insensitive username collision among non-deleted users
    pub fn username_taken(&self, username: &str, exclude_id: Option<&str>) -> bool {
        let wanted = username.trim().to_lowercase();
        self.users.values().any(|u| {
            !u.is_deleted
                && Some(u.id.as_str()) != exclude_id
                && u.username.to_lowercase() == wanted
        })
    }

    // ------------------------------------------------------------------
    // Direct Chats
    // ------------------------------------------------------------------

    /// The owner's endpoint for a chat, created empty when absent
    pub fn endpoint_mut(&mut self, owner: &str, partner: &str) -> &mut ChatEndpoint {
        self.chats
            .entry(owner.to_string())
            .or_default()
            .entry(partner.to_string())
            .or_default()
    }

    /// Point both endpoints of a chat at a new last message
    pub fn touch_chat(&mut self, a: &str, b: &str, message_id: &str, now: i64) {
        let endpoint = self.endpoint_mut(a, b);
        endpoint.last_message_id = Some(message_id.to_string());
        endpoint.updated_at = now;
        if a != b {
            let endpoint = self.endpoint_mut(b, a);
            endpoint.last_message_id = Some(message_id.to_string());
            endpoint.updated_at = now;
        }
    }

    pub fn message(&self, chat_id: &str, message_id: &str) -> Option<&DirectMessage> {
        self.messages
            .get(chat_id)?
            .iter()
            .find(|m| m.id == message_id)
    }

    pub fn message_mut(&mut self, chat_id: &str, message_id: &str) -> Option<&mut DirectMessage> {
        self.messages
            .get_mut(chat_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
    }

    /// ID of the latest message in a chat (highest timestamp, ties go to
    /// the later append)
    pub fn latest_message_id(&self, chat_id: &str) -> Option<String> {
        self.messages
            .get(chat_id)?
            .iter()
            .max_by_key(|m| m.timestamp)
            .map(|m| m.id.clone())
    }

    /// Recompute both endpoints' last-message reference after deletions
    pub fn refresh_last_message(&mut self, a: &str, b: &str) {
        let chat_id = direct_chat_id(a, b);
        let latest = self.latest_message_id(&chat_id);
        for (owner, partner) in [(a, b), (b, a)] {
            if let Some(endpoint) = self
                .chats
                .get_mut(owner)
                .and_then(|chats| chats.get_mut(partner))
            {
                endpoint.last_message_id = latest.clone();
            }
            if a == b {
                break;
            }
        }
    }

    pub fn chat_view(&self, owner: &str, partner: &str) -> Option<ChatView> {
        let endpoint = self.chats.get(owner)?.get(partner)?;
        let chat_id = direct_chat_id(owner, partner);
        let last_message = endpoint
            .last_message_id
            .as_deref()
            .and_then(|id| self.message(&chat_id, id))
            .cloned();

        Some(ChatView {
            chat_id,
            partner_id: partner.to_string(),
            last_message,
            unread_count: endpoint.unread_count,
            updated_at: endpoint.updated_at,
        })
    }

    /// Promote every `sent` message addressed to this user to
    /// `delivered`, across all chats. Runs when the user binds.
    pub fn promote_sent_to_delivered(&mut self, user_id: &str) -> Vec<DeliveredRef> {
        let mut delivered = Vec::new();
        for (chat_id, messages) in self.messages.iter_mut() {
            for message in messages.iter_mut() {
                if message.receiver_id == user_id && message.status == MessageStatus::Sent {
                    message.status = MessageStatus::Delivered;
                    delivered.push(DeliveredRef {
                        message_id: message.id.clone(),
                        chat_id: chat_id.clone(),
                    });
                }
            }
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Pins and Blocks
    // ------------------------------------------------------------------

    /// A user's pinned-message list for one chat
    pub fn pinned_messages_for(&self, user_id: &str, chat_id: &str) -> Vec<String> {
        self.pinned_messages
            .get(user_id)
            .and_then(|chats| chats.get(chat_id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn pinned_messages_mut(&mut self, user_id: &str, chat_id: &str) -> &mut Vec<String> {
        self.pinned_messages
            .entry(user_id.to_string())
            .or_default()
            .entry(chat_id.to_string())
            .or_default()
    }

    /// Is `sender` blocked from messaging `receiver`?
    pub fn is_blocked_by(&self, receiver: &str, sender: &str) -> bool {
        self.blocked
            .get(receiver)
            .map(|list| list.iter().any(|b| b == sender))
            .unwrap_or(false)
    }

    /// Set or clear a block, keeping `blocked` and `blocked_by` mirrored
    pub fn set_block(&mut self, blocker: &str, target: &str, is_blocked: bool) {
        let blocked = self.blocked.entry(blocker.to_string()).or_default();
        let blocked_by = self.blocked_by.entry(target.to_string()).or_default();
        if is_blocked {
            if !blocked.iter().any(|b| b == target) {
                blocked.push(target.to_string());
            }
            if !blocked_by.iter().any(|b| b == blocker) {
                blocked_by.push(blocker.to_string());
            }
        } else {
            blocked.retain(|b| b != target);
            blocked_by.retain(|b| b != blocker);
        }
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub fn group_message(&self, group_id: &str, message_id: &str) -> Option<&GroupMessage> {
        self.group_messages
            .get(group_id)?
            .iter()
            .find(|m| m.id == message_id)
    }

    pub fn group_message_mut(
        &mut self,
        group_id: &str,
        message_id: &str,
    ) -> Option<&mut GroupMessage> {
        self.group_messages
            .get_mut(group_id)?
            .iter_mut()
            .find(|m| m.id == message_id)
    }

    pub fn group_view(&self, group: &Group) -> GroupView {
        let last_message = group
            .last_message_id
            .as_deref()
            .and_then(|id| self.group_message(&group.id, id))
            .cloned();

        GroupView {
            id: group.id.clone(),
            name: group.name.clone(),
            description: group.description.clone(),
            avatar: group.avatar.clone(),
            creator_id: group.creator_id.clone(),
            member_ids: group.member_ids.clone(),
            admins: group.admins.clone(),
            created_at: group.created_at,
            unread_counts: group.unread_counts.clone(),
            pinned_message_ids: group.pinned_message_ids.clone(),
            last_message,
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// The full per-user state pushed on bind. `include_recovery` is true
    /// only for the `register_success` payload.
    pub fn snapshot_for(
        &self,
        user_id: &str,
        include_recovery: bool,
        online_user_ids: Vec<String>,
    ) -> Option<Snapshot> {
        let subject = self.users.get(user_id)?;
        let user = if include_recovery {
            subject.clone()
        } else {
            subject.public_view()
        };

        let users = self.users.values().map(|u| {
            if u.id == user_id && include_recovery {
                u.clone()
            } else {
                u.public_view()
            }
        });

        let mut chats = BTreeMap::new();
        let mut messages = BTreeMap::new();
        if let Some(endpoints) = self.chats.get(user_id) {
            for partner_id in endpoints.keys() {
                if let Some(view) = self.chat_view(user_id, partner_id) {
                    let chat_id = view.chat_id.clone();
                    if let Some(log) = self.messages.get(&chat_id) {
                        messages.insert(chat_id, log.clone());
                    }
                    chats.insert(partner_id.clone(), view);
                }
            }
        }

        let mut groups = Vec::new();
        let mut group_messages = BTreeMap::new();
        for group in self.groups.values() {
            if group.is_deleted || !group.is_member(user_id) {
                continue;
            }
            if let Some(log) = self.group_messages.get(&group.id) {
                group_messages.insert(group.id.clone(), log.clone());
            }
            groups.push(self.group_view(group));
        }

        Some(Snapshot {
            user,
            users: users.collect(),
            chats,
            groups,
            messages,
            group_messages,
            blocked: self.blocked.get(user_id).cloned().unwrap_or_default(),
            blocked_by: self.blocked_by.get(user_id).cloned().unwrap_or_default(),
            pinned_chats: self.pinned_chats.get(user_id).cloned().unwrap_or_default(),
            pinned_messages: self
                .pinned_messages
                .get(user_id)
                .cloned()
                .unwrap_or_default(),
            online_user_ids,
        })
    }
}

// ============================================================================
// Store
// ============================================================================

/// Owns the state document and its backing file. All mutating command
/// processing holds the lock for the full decode-mutate-flush cycle, which
/// is what serializes writers.
pub struct Store {
    path: PathBuf,
    state: Mutex<State>,
}

impl Store {
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let state = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("State document unreadable, starting empty: {}", e);
                    State::default()
                }
            },
            Err(_) => State::default(),
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the document to disk. Failures are logged and swallowed: the
    /// in-memory mutation stands and the next successful flush snapshots
    /// the latest state.
    pub async fn flush(&self, state: &State) {
        if let Err(e) = self.write_document(state).await {
            tracing::error!("State flush failed: {}", e);
        }
    }

    /// Write to a temp file in the same directory, then rename over the
    /// document, so the file on disk is always well-formed.
    async fn write_document(&self, state: &State) -> Result<()> {
        let data = serde_json::to_vec_pretty(state)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &data).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}
