//! Profile, account, and block handlers

use crate::models::*;
use crate::store::State;
use crate::websocket::{Outbound, SessionRegistry};

use super::{Reply, SessionCtx};

/// Partial profile update. The recovery code is never touched here.
pub fn update_profile(
    state: &mut State,
    me: &str,
    username: Option<String>,
    display_name: Option<String>,
    avatar: Option<String>,
    bio: Option<String>,
) -> Reply {
    if let Some(ref username) = username {
        let username = username.trim();
        if username.is_empty() {
            return Reply::none();
        }
        if state.username_taken(username, Some(me)) {
            return Reply::send(vec![Outbound::to_origin(ServerEvent::ProfileError {
                reason: "username_taken".to_string(),
            })]);
        }
    }

    let Some(user) = state.users.get_mut(me) else {
        return Reply::none();
    };
    if let Some(username) = username {
        user.username = username.trim().to_string();
    }
    if let Some(display_name) = display_name {
        user.display_name = display_name;
    }
    if let Some(avatar) = avatar {
        user.avatar = avatar;
    }
    if let Some(bio) = bio {
        user.bio = bio;
    }
    let public = user.public_view();

    Reply::persist(vec![
        Outbound::to_origin(ServerEvent::ProfileUpdated {
            user: public.clone(),
        }),
        Outbound::broadcast(ServerEvent::UserUpdated { user: public }, true),
    ])
}

/// Soft delete: the record stays so historical messages keep a valid
/// sender; new messages to this user are refused from now on.
pub fn delete_account(
    state: &mut State,
    registry: &SessionRegistry,
    ctx: &mut SessionCtx,
    me: &str,
) -> Reply {
    let Some(user) = state.users.get_mut(me) else {
        return Reply::none();
    };
    user.is_deleted = true;
    user.is_online = false;
    user.last_seen = now_ms();

    registry.unbind_if_owner(me, ctx.conn_id);
    ctx.user_id = None;

    tracing::info!("User {} deleted their account", me);

    Reply::persist(vec![
        Outbound::to_origin(ServerEvent::AccountDeleted {}),
        Outbound::broadcast(
            ServerEvent::UserDeleted {
                user_id: me.to_string(),
            },
            true,
        ),
    ])
}

pub fn block_user(state: &mut State, me: &str, user_id: &str, is_blocked: bool) -> Reply {
    if user_id == me || !state.users.contains_key(user_id) {
        return Reply::none();
    }

    state.set_block(me, user_id, is_blocked);

    Reply::persist(vec![
        Outbound::to_origin(ServerEvent::UserBlocked {
            user_id: user_id.to_string(),
            is_blocked,
            blocked: state.blocked.get(me).cloned().unwrap_or_default(),
        }),
        Outbound::to_user(
            user_id.to_string(),
            ServerEvent::YouWereBlocked {
                user_id: me.to_string(),
                is_blocked,
                blocked_by: state.blocked_by.get(user_id).cloned().unwrap_or_default(),
            },
        ),
    ])
}
