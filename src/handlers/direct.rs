//! Direct (one-to-one) chat engine
//!
//! Message lifecycle is `sent -> delivered -> seen`. A message reaches
//! `delivered` immediately when the receiver is online, otherwise in the
//! batch promotion when the receiver next binds.

use crate::crypto;
use crate::models::*;
use crate::store::{direct_chat_id, State};
use crate::websocket::{Outbound, SessionRegistry};

use super::Reply;

pub fn send_message(
    state: &mut State,
    registry: &SessionRegistry,
    me: &str,
    input: DirectMessageIn,
    forward: bool,
) -> Reply {
    if input.sender_id != me {
        tracing::debug!("Dropping send with mismatched sender {}", input.sender_id);
        return Reply::none();
    }
    if input.text.trim().is_empty() {
        return Reply::none();
    }
    let Some(receiver) = state.users.get(&input.receiver_id) else {
        return Reply::none();
    };

    if receiver.is_deleted {
        return Reply::send(vec![Outbound::to_origin(ServerEvent::MessageBlocked {
            receiver_id: input.receiver_id,
            reason: "receiver_deleted".to_string(),
        })]);
    }
    if state.is_blocked_by(&input.receiver_id, me) {
        return Reply::send(vec![Outbound::to_origin(ServerEvent::MessageBlocked {
            receiver_id: input.receiver_id,
            reason: "blocked".to_string(),
        })]);
    }

    let chat_id = direct_chat_id(me, &input.receiver_id);
    let now = now_ms();
    let receiver_online = input.receiver_id == me || registry.is_online(&input.receiver_id);

    let message = DirectMessage {
        id: input.id,
        chat_id: chat_id.clone(),
        sender_id: input.sender_id,
        receiver_id: input.receiver_id,
        text: input.text,
        reply_to: if forward { None } else { input.reply_to },
        forwarded_from: if forward { input.forwarded_from } else { None },
        timestamp: now,
        status: if receiver_online {
            MessageStatus::Delivered
        } else {
            MessageStatus::Sent
        },
        is_edited: false,
        is_deleted: false,
        is_system: false,
        reactions: Vec::new(),
    };

    let receiver_id = message.receiver_id.clone();
    state
        .messages
        .entry(chat_id.clone())
        .or_default()
        .push(message.clone());
    state.touch_chat(me, &receiver_id, &message.id, now);
    state.endpoint_mut(&receiver_id, me).unread_count += 1;

    let mut events = vec![Outbound::to_origin(ServerEvent::MessageSent {
        message: message.clone(),
    })];
    if receiver_id != me && receiver_online {
        events.push(Outbound::to_user(
            receiver_id,
            ServerEvent::NewMessage {
                message: message.clone(),
            },
        ));
        events.push(Outbound::to_origin(ServerEvent::MessageDelivered {
            chat_id,
            message_id: message.id,
        }));
    }

    Reply::persist(events)
}

pub fn edit_message(
    state: &mut State,
    me: &str,
    chat_id: &str,
    message_id: &str,
    new_text: &str,
) -> Reply {
    if new_text.trim().is_empty() {
        return Reply::none();
    }
    let Some(message) = state.message_mut(chat_id, message_id) else {
        return Reply::none();
    };
    if message.sender_id != me {
        tracing::debug!("Dropping edit of foreign message {}", message_id);
        return Reply::none();
    }

    message.text = new_text.to_string();
    message.is_edited = true;
    let message = message.clone();

    let events = [&message.sender_id, &message.receiver_id]
        .iter()
        .map(|p| {
            Outbound::to_user(
                p.to_string(),
                ServerEvent::MessageEdited {
                    chat_id: chat_id.to_string(),
                    message: message.clone(),
                },
            )
        })
        .collect();

    Reply::persist(events)
}

/// Delete messages from a chat. The source enforces no authorization
/// here beyond a bound session; kept as-is pending product clarification.
pub fn delete_message(state: &mut State, chat_id: &str, message_ids: &[String]) -> Reply {
    let Some(log) = state.messages.get_mut(chat_id) else {
        return Reply::none();
    };

    let mut removed = Vec::new();
    log.retain(|m| {
        if message_ids.iter().any(|id| *id == m.id) {
            removed.push(m.clone());
            false
        } else {
            true
        }
    });
    if removed.is_empty() {
        return Reply::none();
    }

    let removed_ids: Vec<String> = removed.iter().map(|m| m.id.clone()).collect();
    let (a, b) = (removed[0].sender_id.clone(), removed[0].receiver_id.clone());

    // unseen deletions also leave the receiver's unread counter
    for message in &removed {
        if message.status != MessageStatus::Seen {
            let endpoint = state.endpoint_mut(&message.receiver_id, &message.sender_id);
            endpoint.unread_count = endpoint.unread_count.saturating_sub(1);
        }
    }

    for participant in [&a, &b] {
        state
            .pinned_messages_mut(participant, chat_id)
            .retain(|id| !removed_ids.contains(id));
    }
    state.refresh_last_message(&a, &b);

    let events = [&a, &b]
        .iter()
        .map(|p| {
            Outbound::to_user(
                p.to_string(),
                ServerEvent::MessageDeleted {
                    chat_id: chat_id.to_string(),
                    message_ids: removed_ids.clone(),
                    pinned_message_ids: state.pinned_messages_for(p, chat_id),
                },
            )
        })
        .collect();

    Reply::persist(events)
}

pub fn mark_seen(
    state: &mut State,
    me: &str,
    chat_id: &str,
    user_id: &str,
    partner_id: &str,
) -> Reply {
    if user_id != me {
        return Reply::none();
    }

    let mut transitioned = 0usize;
    if let Some(log) = state.messages.get_mut(chat_id) {
        for message in log.iter_mut() {
            if message.receiver_id == me && message.status != MessageStatus::Seen {
                message.status = MessageStatus::Seen;
                transitioned += 1;
            }
        }
    }

    let endpoint = state.endpoint_mut(me, partner_id);
    let had_unread = endpoint.unread_count > 0;
    endpoint.unread_count = 0;

    // idempotent: a repeat call with nothing new emits nothing
    if transitioned == 0 && !had_unread {
        return Reply::none();
    }

    let mut events = Vec::new();
    if partner_id != me {
        events.push(Outbound::to_user(
            partner_id.to_string(),
            ServerEvent::MessagesSeen {
                chat_id: chat_id.to_string(),
                seen_by: me.to_string(),
            },
        ));
    }
    events.push(Outbound::to_origin(ServerEvent::UnreadCleared {
        chat_id: chat_id.to_string(),
    }));

    Reply::persist(events)
}

pub fn mark_messages_seen(
    state: &mut State,
    me: &str,
    chat_id: &str,
    user_id: &str,
    partner_id: &str,
    message_ids: &[String],
) -> Reply {
    if user_id != me || message_ids.is_empty() {
        return Reply::none();
    }

    let mut seen_ids = Vec::new();
    if let Some(log) = state.messages.get_mut(chat_id) {
        for message in log.iter_mut() {
            if message.receiver_id == me
                && message.status != MessageStatus::Seen
                && message_ids.iter().any(|id| *id == message.id)
            {
                message.status = MessageStatus::Seen;
                seen_ids.push(message.id.clone());
            }
        }
    }
    if seen_ids.is_empty() {
        return Reply::none();
    }

    let endpoint = state.endpoint_mut(me, partner_id);
    endpoint.unread_count = endpoint.unread_count.saturating_sub(seen_ids.len() as u32);
    let unread_count = endpoint.unread_count;

    let mut events = Vec::new();
    if partner_id != me {
        events.push(Outbound::to_user(
            partner_id.to_string(),
            ServerEvent::SpecificMessagesSeen {
                chat_id: chat_id.to_string(),
                message_ids: seen_ids,
                seen_by: me.to_string(),
            },
        ));
    }
    events.push(Outbound::to_origin(ServerEvent::ChatUnreadUpdated {
        chat_id: chat_id.to_string(),
        unread_count,
    }));

    Reply::persist(events)
}

/// Stateless typing forward
pub fn typing(me: &str, user_id: &str, partner_id: &str, is_typing: bool) -> Reply {
    if user_id != me {
        return Reply::none();
    }

    Reply::send(vec![Outbound::to_user(
        partner_id.to_string(),
        ServerEvent::UserTyping {
            user_id: me.to_string(),
            is_typing,
        },
    )])
}

pub fn pin_message(
    state: &mut State,
    registry: &SessionRegistry,
    me: &str,
    chat_id: &str,
    message_id: &str,
    is_pinned: bool,
    actor_id: &str,
) -> Reply {
    if actor_id != me {
        tracing::debug!("Dropping pin with mismatched actor {}", actor_id);
        return Reply::none();
    }
    let Some(message) = state.message(chat_id, message_id) else {
        return Reply::none();
    };
    let (a, b) = (message.sender_id.clone(), message.receiver_id.clone());
    if a != me && b != me {
        return Reply::none();
    }

    // mirrored pin: both participants' lists change together
    for participant in [&a, &b] {
        let pinned = state.pinned_messages_mut(participant, chat_id);
        if is_pinned {
            if !pinned.iter().any(|id| id == message_id) {
                pinned.push(message_id.to_string());
            }
        } else {
            pinned.retain(|id| id != message_id);
        }
    }

    // pinning announces itself with a system message, except in the
    // self-chat ("Saved Messages")
    let is_self_chat = a == b;
    let mut system_message = None;
    if is_pinned && !is_self_chat {
        let other = if a == me { b.clone() } else { a.clone() };
        let label = state
            .users
            .get(me)
            .map(|u| u.label().to_string())
            .unwrap_or_else(|| me.to_string());
        let now = now_ms();

        let message = DirectMessage {
            id: crypto::generate_message_id(),
            chat_id: chat_id.to_string(),
            sender_id: me.to_string(),
            receiver_id: other.clone(),
            text: format!("{} pinned a message", label),
            reply_to: None,
            forwarded_from: None,
            timestamp: now,
            status: if registry.is_online(&other) {
                MessageStatus::Delivered
            } else {
                MessageStatus::Sent
            },
            is_edited: false,
            is_deleted: false,
            is_system: true,
            reactions: Vec::new(),
        };

        state
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .push(message.clone());
        state.touch_chat(me, &other, &message.id, now);
        state.endpoint_mut(&other, me).unread_count += 1;

        system_message = Some(message);
    }

    let mut events: Vec<Outbound> = [&a, &b]
        .iter()
        .map(|p| {
            Outbound::to_user(
                p.to_string(),
                ServerEvent::MessagePinned {
                    chat_id: chat_id.to_string(),
                    message_id: message_id.to_string(),
                    is_pinned,
                    pinned_message_ids: state.pinned_messages_for(p, chat_id),
                    // the actor gets the system message inline
                    system_message: if p.as_str() == me {
                        system_message.clone()
                    } else {
                        None
                    },
                },
            )
        })
        .collect();

    if let Some(message) = system_message {
        let other = message.receiver_id.clone();
        events.push(Outbound::to_user(
            other,
            ServerEvent::NewMessage { message },
        ));
    }

    Reply::persist(events)
}

pub fn add_reaction(
    state: &mut State,
    me: &str,
    chat_id: &str,
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Reply {
    if user_id != me {
        return Reply::none();
    }
    let Some(message) = state.message_mut(chat_id, message_id) else {
        return Reply::none();
    };

    toggle_reaction(&mut message.reactions, me, emoji);
    let reactions = message.reactions.clone();
    let (a, b) = (message.sender_id.clone(), message.receiver_id.clone());

    let events = [&a, &b]
        .iter()
        .map(|p| {
            Outbound::to_user(
                p.to_string(),
                ServerEvent::ReactionUpdated {
                    chat_id: chat_id.to_string(),
                    message_id: message_id.to_string(),
                    reactions: reactions.clone(),
                },
            )
        })
        .collect();

    Reply::persist(events)
}

/// One reaction per user per message: the same emoji toggles off, a
/// different emoji replaces.
pub fn toggle_reaction(reactions: &mut Vec<Reaction>, user_id: &str, emoji: &str) {
    let exact = reactions
        .iter()
        .any(|r| r.user_id == user_id && r.emoji == emoji);
    reactions.retain(|r| r.user_id != user_id);
    if !exact {
        reactions.push(Reaction {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
        });
    }
}

pub fn pin_chat(state: &mut State, me: &str, partner_id: &str, is_pinned: bool) -> Reply {
    let pinned = state.pinned_chats.entry(me.to_string()).or_default();
    if is_pinned {
        if !pinned.iter().any(|p| p == partner_id) {
            pinned.push(partner_id.to_string());
        }
    } else {
        pinned.retain(|p| p != partner_id);
    }

    Reply::persist(vec![Outbound::to_origin(ServerEvent::ChatPinned {
        pinned_chats: pinned.clone(),
    })])
}

/// Remove a conversation outright: the log, both endpoints, both pin
/// lists. The store holds one copy of a chat, so deletion is global.
pub fn delete_chat(state: &mut State, me: &str, partner_id: &str) -> Reply {
    let chat_id = direct_chat_id(me, partner_id);

    state.messages.remove(&chat_id);
    if let Some(chats) = state.chats.get_mut(me) {
        chats.remove(partner_id);
    }
    if let Some(chats) = state.chats.get_mut(partner_id) {
        chats.remove(me);
    }
    for participant in [me, partner_id] {
        if let Some(pins) = state.pinned_messages.get_mut(participant) {
            pins.remove(&chat_id);
        }
    }

    let events = [me, partner_id]
        .iter()
        .map(|p| {
            Outbound::to_user(
                p.to_string(),
                ServerEvent::ChatDeleted {
                    chat_id: chat_id.clone(),
                },
            )
        })
        .collect();

    Reply::persist(events)
}
