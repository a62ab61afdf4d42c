//! Group chat engine
//!
//! Authorization: the creator may set admins and can never be removed or
//! demoted; admins may manage membership, delete any message, and pin;
//! members may send, edit and delete their own messages, react, and mark
//! seen.

use crate::models::*;
use crate::store::State;
use crate::websocket::Outbound;

use super::direct::toggle_reaction;
use super::Reply;

/// Events carrying a group view to every member
fn to_members(state: &State, group: &Group, event_for: impl Fn(GroupView) -> ServerEvent) -> Outbound {
    Outbound::to_users(group.member_ids.clone(), event_for(state.group_view(group)))
}

pub fn create_group(state: &mut State, me: &str, data: CreateGroupData) -> Reply {
    if data.id.trim().is_empty() || data.name.trim().is_empty() {
        return Reply::none();
    }
    if state.groups.contains_key(&data.id) {
        tracing::debug!("Dropping create_group for existing id {}", data.id);
        return Reply::none();
    }

    // dedup, keep only live users, creator always first
    let mut member_ids = vec![me.to_string()];
    for candidate in data.member_ids {
        if member_ids.iter().any(|m| *m == candidate) {
            continue;
        }
        let live = state
            .users
            .get(&candidate)
            .map(|u| !u.is_deleted)
            .unwrap_or(false);
        if live {
            member_ids.push(candidate);
        }
    }

    let group = Group {
        id: data.id.clone(),
        name: data.name,
        description: data.description,
        avatar: data.avatar,
        creator_id: me.to_string(),
        admins: vec![me.to_string()],
        created_at: now_ms(),
        is_deleted: false,
        unread_counts: member_ids.iter().map(|m| (m.clone(), 0)).collect(),
        pinned_message_ids: Vec::new(),
        last_message_id: None,
        member_ids,
    };

    let view = state.group_view(&group);
    let members = group.member_ids.clone();
    state.groups.insert(data.id, group);

    tracing::info!("Group {} created with {} members", view.id, members.len());

    Reply::persist(vec![Outbound::to_users(
        members,
        ServerEvent::GroupCreated { group: view },
    )])
}

pub fn send_group_message(
    state: &mut State,
    me: &str,
    input: GroupMessageIn,
    forward: bool,
) -> Reply {
    if input.sender_id != me || input.text.trim().is_empty() {
        return Reply::none();
    }
    let authorized = state
        .groups
        .get(&input.group_id)
        .map(|g| !g.is_deleted && g.is_member(me))
        .unwrap_or(false);
    if !authorized {
        tracing::debug!("Dropping group send from non-member {}", me);
        return Reply::none();
    }

    let message = GroupMessage {
        id: input.id,
        group_id: input.group_id.clone(),
        sender_id: input.sender_id,
        text: input.text,
        reply_to: if forward { None } else { input.reply_to },
        forwarded_from: if forward { input.forwarded_from } else { None },
        timestamp: now_ms(),
        reactions: Vec::new(),
        seen_by: vec![me.to_string()],
        is_edited: false,
        is_deleted: false,
        is_system: false,
    };

    state
        .group_messages
        .entry(input.group_id.clone())
        .or_default()
        .push(message.clone());

    let Some(group) = state.groups.get_mut(&input.group_id) else {
        return Reply::none();
    };
    group.last_message_id = Some(message.id.clone());
    for member in group.member_ids.clone() {
        if member == me {
            group.unread_counts.insert(member, 0);
        } else {
            *group.unread_counts.entry(member).or_insert(0) += 1;
        }
    }

    let Some(group) = state.groups.get(&input.group_id) else {
        return Reply::none();
    };
    let view = state.group_view(group);
    let others: Vec<String> = group
        .member_ids
        .iter()
        .filter(|m| m.as_str() != me)
        .cloned()
        .collect();

    Reply::persist(vec![
        Outbound::to_origin(ServerEvent::GroupMessageSent {
            message: message.clone(),
            group: view.clone(),
        }),
        Outbound::to_users(
            others,
            ServerEvent::NewGroupMessage {
                message,
                group: view,
            },
        ),
    ])
}

/// Sweep every unseen message for one member. The member identity comes
/// from the payload; the source validates it only for the selective
/// variant below.
pub fn mark_group_seen(state: &mut State, group_id: &str, user_id: &str) -> Reply {
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    if !group.is_member(user_id) {
        return Reply::none();
    }
    let members = group.member_ids.clone();

    let mut seen_ids = Vec::new();
    if let Some(log) = state.group_messages.get_mut(group_id) {
        for message in log.iter_mut() {
            if !message.is_system
                && message.sender_id != user_id
                && !message.seen_by.iter().any(|s| s == user_id)
            {
                message.seen_by.push(user_id.to_string());
                seen_ids.push(message.id.clone());
            }
        }
    }

    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    let had_unread = group.unread_counts.get(user_id).copied().unwrap_or(0) > 0;
    if seen_ids.is_empty() && !had_unread {
        return Reply::none();
    }
    group.unread_counts.insert(user_id.to_string(), 0);

    let mut events = vec![Outbound::to_user(
        user_id.to_string(),
        ServerEvent::GroupUnreadUpdated {
            group_id: group_id.to_string(),
            unread_count: 0,
        },
    )];
    if !seen_ids.is_empty() {
        events.push(Outbound::to_users(
            members,
            ServerEvent::GroupMessagesSeen {
                group_id: group_id.to_string(),
                message_ids: seen_ids,
                seen_by: user_id.to_string(),
            },
        ));
    }

    Reply::persist(events)
}

pub fn mark_group_messages_seen(
    state: &mut State,
    me: &str,
    group_id: &str,
    user_id: &str,
    message_ids: &[String],
) -> Reply {
    if user_id != me || message_ids.is_empty() {
        return Reply::none();
    }
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    if !group.is_member(me) {
        return Reply::none();
    }
    let members = group.member_ids.clone();

    let mut seen_ids = Vec::new();
    if let Some(log) = state.group_messages.get_mut(group_id) {
        for message in log.iter_mut() {
            if !message.is_system
                && message.sender_id != me
                && !message.seen_by.iter().any(|s| s == me)
                && message_ids.iter().any(|id| *id == message.id)
            {
                message.seen_by.push(me.to_string());
                seen_ids.push(message.id.clone());
            }
        }
    }
    if seen_ids.is_empty() {
        return Reply::none();
    }

    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    let unread = group.unread_counts.entry(me.to_string()).or_insert(0);
    *unread = unread.saturating_sub(seen_ids.len() as u32);
    let unread_count = *unread;

    Reply::persist(vec![
        Outbound::to_origin(ServerEvent::GroupUnreadUpdated {
            group_id: group_id.to_string(),
            unread_count,
        }),
        Outbound::to_users(
            members,
            ServerEvent::GroupMessagesSeen {
                group_id: group_id.to_string(),
                message_ids: seen_ids,
                seen_by: me.to_string(),
            },
        ),
    ])
}

pub fn edit_group_message(
    state: &mut State,
    me: &str,
    group_id: &str,
    message_id: &str,
    new_text: &str,
) -> Reply {
    if new_text.trim().is_empty() {
        return Reply::none();
    }
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let members = group.member_ids.clone();
    let Some(message) = state.group_message_mut(group_id, message_id) else {
        return Reply::none();
    };
    if message.sender_id != me {
        return Reply::none();
    }

    message.text = new_text.to_string();
    message.is_edited = true;
    let message = message.clone();

    Reply::persist(vec![Outbound::to_users(
        members,
        ServerEvent::GroupMessageEdited {
            group_id: group_id.to_string(),
            message,
        },
    )])
}

/// Delete is allowed for the sender and for any admin
pub fn delete_group_message(
    state: &mut State,
    me: &str,
    group_id: &str,
    message_id: &str,
) -> Reply {
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let Some(message) = state.group_message(group_id, message_id) else {
        return Reply::none();
    };
    if message.sender_id != me && !group.is_admin(me) {
        tracing::debug!("Dropping unauthorized group delete by {}", me);
        return Reply::none();
    }
    let removed = message.clone();

    if let Some(log) = state.group_messages.get_mut(group_id) {
        log.retain(|m| m.id != message_id);
    }
    let latest = state
        .group_messages
        .get(group_id)
        .and_then(|log| log.iter().max_by_key(|m| m.timestamp))
        .map(|m| m.id.clone());

    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    group.pinned_message_ids.retain(|id| id != message_id);
    group.last_message_id = latest;

    // members that never saw it lose it from their unread counter
    if !removed.is_system {
        for member in group.member_ids.clone() {
            if member != removed.sender_id && !removed.seen_by.iter().any(|s| *s == member) {
                if let Some(unread) = group.unread_counts.get_mut(&member) {
                    *unread = unread.saturating_sub(1);
                }
            }
        }
    }

    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let event = to_members(state, group, |group| ServerEvent::GroupMessageDeleted {
        group_id: group_id.to_string(),
        message_id: message_id.to_string(),
        group,
    });

    Reply::persist(vec![event])
}

pub fn pin_group_message(
    state: &mut State,
    me: &str,
    group_id: &str,
    message_id: &str,
    is_pinned: bool,
) -> Reply {
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    if !group.is_admin(me) {
        tracing::debug!("Dropping group pin by non-admin {}", me);
        return Reply::none();
    }
    if state.group_message(group_id, message_id).is_none() {
        return Reply::none();
    }

    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    if is_pinned {
        if !group.pinned_message_ids.iter().any(|id| id == message_id) {
            group.pinned_message_ids.push(message_id.to_string());
        }
    } else {
        group.pinned_message_ids.retain(|id| id != message_id);
    }

    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let event = to_members(state, group, |group| ServerEvent::GroupMessagePinned {
        group,
        message_id: message_id.to_string(),
        is_pinned,
    });

    Reply::persist(vec![event])
}

pub fn add_group_member(state: &mut State, me: &str, group_id: &str, user_id: &str) -> Reply {
    let live = state
        .users
        .get(user_id)
        .map(|u| !u.is_deleted)
        .unwrap_or(false);
    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    if !group.is_admin(me) || !live || group.is_member(user_id) {
        return Reply::none();
    }

    group.member_ids.push(user_id.to_string());
    group.unread_counts.insert(user_id.to_string(), 0);

    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let event = to_members(state, group, |group| ServerEvent::GroupUpdated {
        group: Some(group),
    });

    Reply::persist(vec![event])
}

pub fn remove_group_member(state: &mut State, me: &str, group_id: &str, user_id: &str) -> Reply {
    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    // the creator can never be removed; admins remove others, anyone may
    // remove themselves (leave)
    if user_id == group.creator_id || !group.is_member(user_id) {
        return Reply::none();
    }
    if !group.is_admin(me) && user_id != me {
        tracing::debug!("Dropping unauthorized member removal by {}", me);
        return Reply::none();
    }

    group.member_ids.retain(|m| m != user_id);
    group.admins.retain(|a| a != user_id);
    group.unread_counts.remove(user_id);

    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let remaining = to_members(state, group, |group| ServerEvent::GroupUpdated {
        group: Some(group),
    });

    Reply::persist(vec![
        // `group: null` tells the removed user to drop the group
        Outbound::to_user(user_id.to_string(), ServerEvent::GroupUpdated { group: None }),
        remaining,
    ])
}

pub fn set_group_admin(
    state: &mut State,
    me: &str,
    group_id: &str,
    user_id: &str,
    is_admin: bool,
) -> Reply {
    let Some(group) = state.groups.get_mut(group_id) else {
        return Reply::none();
    };
    if group.creator_id != me {
        tracing::debug!("Dropping set_group_admin by non-creator {}", me);
        return Reply::none();
    }
    // the creator's admin bit is not negotiable
    if user_id == group.creator_id || !group.is_member(user_id) {
        return Reply::none();
    }

    if is_admin {
        if !group.admins.iter().any(|a| a == user_id) {
            group.admins.push(user_id.to_string());
        }
    } else {
        group.admins.retain(|a| a != user_id);
    }

    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    let event = to_members(state, group, |group| ServerEvent::GroupUpdated {
        group: Some(group),
    });

    Reply::persist(vec![event])
}

pub fn add_group_reaction(
    state: &mut State,
    me: &str,
    group_id: &str,
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Reply {
    if user_id != me {
        return Reply::none();
    }
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    if !group.is_member(me) {
        return Reply::none();
    }
    let members = group.member_ids.clone();

    let Some(message) = state.group_message_mut(group_id, message_id) else {
        return Reply::none();
    };
    toggle_reaction(&mut message.reactions, me, emoji);
    let reactions = message.reactions.clone();

    Reply::persist(vec![Outbound::to_users(
        members,
        ServerEvent::GroupReactionUpdated {
            group_id: group_id.to_string(),
            message_id: message_id.to_string(),
            reactions,
        },
    )])
}

/// Stateless typing forward to every member except the typer
pub fn group_typing(state: &State, me: &str, group_id: &str, is_typing: bool) -> Reply {
    let Some(group) = state.groups.get(group_id) else {
        return Reply::none();
    };
    if !group.is_member(me) {
        return Reply::none();
    }

    let others: Vec<String> = group
        .member_ids
        .iter()
        .filter(|m| m.as_str() != me)
        .cloned()
        .collect();

    Reply::send(vec![Outbound::to_users(
        others,
        ServerEvent::GroupUserTyping {
            group_id: group_id.to_string(),
            user_id: me.to_string(),
            is_typing,
        },
    )])
}
