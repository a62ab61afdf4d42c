//! Command handlers for ChatHub Server
//!
//! Every inbound WebSocket command is routed through [`route`] while the
//! state lock is held. Handlers mutate state and return the events to
//! deliver; they never send anything themselves. That keeps all
//! cross-entity invariants on one serialization point and makes the
//! engines testable without sockets.

pub mod auth;
pub mod direct;
pub mod group;
pub mod health;
pub mod users;
pub mod websocket;

use crate::models::ClientCommand;
use crate::store::State;
use crate::websocket::{ConnId, Outbound, SessionRegistry};

/// Per-connection session state
#[derive(Debug)]
pub struct SessionCtx {
    pub conn_id: ConnId,
    /// Identity bound by register/login; `None` until then
    pub user_id: Option<String>,
}

impl SessionCtx {
    pub fn new(conn_id: ConnId) -> Self {
        Self {
            conn_id,
            user_id: None,
        }
    }
}

/// A handler's result: events to deliver, and whether the state document
/// changed and must be flushed.
#[derive(Debug, Default)]
pub struct Reply {
    pub events: Vec<Outbound>,
    pub persist: bool,
}

impl Reply {
    /// Silently drop the command
    pub fn none() -> Self {
        Self::default()
    }

    /// Deliver events without flushing (nothing persisted changed)
    pub fn send(events: Vec<Outbound>) -> Self {
        Self {
            events,
            persist: false,
        }
    }

    /// Deliver events and flush the state document
    pub fn persist(events: Vec<Outbound>) -> Self {
        Self {
            events,
            persist: true,
        }
    }
}

/// Dispatch one decoded command. Commands that require identity are
/// silently dropped while the session is unbound.
pub fn route(
    state: &mut State,
    registry: &SessionRegistry,
    ctx: &mut SessionCtx,
    command: ClientCommand,
) -> Reply {
    use ClientCommand::*;

    // Commands valid before a bind
    match command {
        Register { user } => return auth::register(state, registry, ctx, user),
        Login { user_id } => return auth::login(state, registry, ctx, &user_id),
        LoginRecovery { recovery_code } => {
            return auth::login_recovery(state, registry, ctx, &recovery_code)
        }
        CheckUsername { username } => return auth::check_username(state, &username),
        Heartbeat {} => {
            return Reply::send(vec![Outbound::to_origin(
                crate::models::ServerEvent::HeartbeatAck {},
            )])
        }
        _ => {}
    }

    let Some(me) = ctx.user_id.clone() else {
        tracing::debug!("Dropping command from unbound session {}", ctx.conn_id);
        return Reply::none();
    };

    match command {
        SearchUser { query } => auth::search_user(state, &me, &query),

        SendMessage { message } => direct::send_message(state, registry, &me, message, false),
        ForwardMessage { message } => direct::send_message(state, registry, &me, message, true),
        EditMessage {
            chat_id,
            message_id,
            new_text,
        } => direct::edit_message(state, &me, &chat_id, &message_id, &new_text),
        DeleteMessage {
            chat_id,
            message_ids,
        } => direct::delete_message(state, &chat_id, &message_ids),
        MarkSeen {
            chat_id,
            user_id,
            partner_id,
        } => direct::mark_seen(state, &me, &chat_id, &user_id, &partner_id),
        MarkMessagesSeen {
            chat_id,
            user_id,
            partner_id,
            message_ids,
        } => direct::mark_messages_seen(state, &me, &chat_id, &user_id, &partner_id, &message_ids),
        Typing {
            user_id,
            partner_id,
            is_typing,
        } => direct::typing(&me, &user_id, &partner_id, is_typing),
        PinMessage {
            chat_id,
            message_id,
            is_pinned,
            actor_id,
        } => direct::pin_message(state, registry, &me, &chat_id, &message_id, is_pinned, &actor_id),
        AddReaction {
            chat_id,
            message_id,
            user_id,
            emoji,
        } => direct::add_reaction(state, &me, &chat_id, &message_id, &user_id, &emoji),
        PinChat {
            partner_id,
            is_pinned,
        } => direct::pin_chat(state, &me, &partner_id, is_pinned),
        DeleteChat { partner_id, .. } => direct::delete_chat(state, &me, &partner_id),

        UpdateProfile {
            username,
            display_name,
            avatar,
            bio,
        } => users::update_profile(state, &me, username, display_name, avatar, bio),
        DeleteAccount {} => users::delete_account(state, registry, ctx, &me),
        BlockUser {
            user_id,
            is_blocked,
        } => users::block_user(state, &me, &user_id, is_blocked),

        CreateGroup { group } => group::create_group(state, &me, group),
        SendGroupMessage { message } => group::send_group_message(state, &me, message, false),
        ForwardGroupMessage { message } => group::send_group_message(state, &me, message, true),
        MarkGroupSeen { group_id, user_id } => group::mark_group_seen(state, &group_id, &user_id),
        MarkGroupMessagesSeen {
            group_id,
            user_id,
            message_ids,
        } => group::mark_group_messages_seen(state, &me, &group_id, &user_id, &message_ids),
        EditGroupMessage {
            group_id,
            message_id,
            new_text,
        } => group::edit_group_message(state, &me, &group_id, &message_id, &new_text),
        DeleteGroupMessage {
            group_id,
            message_id,
        } => group::delete_group_message(state, &me, &group_id, &message_id),
        PinGroupMessage {
            group_id,
            message_id,
            is_pinned,
        } => group::pin_group_message(state, &me, &group_id, &message_id, is_pinned),
        AddGroupMember { group_id, user_id } => {
            group::add_group_member(state, &me, &group_id, &user_id)
        }
        RemoveGroupMember { group_id, user_id } => {
            group::remove_group_member(state, &me, &group_id, &user_id)
        }
        SetGroupAdmin {
            group_id,
            user_id,
            is_admin,
        } => group::set_group_admin(state, &me, &group_id, &user_id, is_admin),
        AddGroupReaction {
            group_id,
            message_id,
            user_id,
            emoji,
        } => group::add_group_reaction(state, &me, &group_id, &message_id, &user_id, &emoji),
        GroupTyping {
            group_id,
            is_typing,
            ..
        } => group::group_typing(state, &me, &group_id, is_typing),

        // Handled above; unreachable here
        Register { .. } | Login { .. } | LoginRecovery { .. } | CheckUsername { .. }
        | Heartbeat {} => Reply::none(),
    }
}
