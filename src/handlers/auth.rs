//! Registration, login, and user lookup

use crate::crypto;
use crate::models::*;
use crate::store::State;
use crate::websocket::{Outbound, SessionRegistry};

use super::{Reply, SessionCtx};

pub fn register(
    state: &mut State,
    registry: &SessionRegistry,
    ctx: &mut SessionCtx,
    data: RegisterData,
) -> Reply {
    let username = data.username.trim().to_string();
    if data.id.trim().is_empty() || username.is_empty() {
        tracing::debug!("Dropping register with empty id or username");
        return Reply::none();
    }

    if state.users.contains_key(&data.id) {
        return Reply::send(vec![Outbound::to_origin(ServerEvent::RegisterError {
            reason: "user_exists".to_string(),
        })]);
    }
    if state.username_taken(&username, None) {
        return Reply::send(vec![Outbound::to_origin(ServerEvent::RegisterError {
            reason: "username_taken".to_string(),
        })]);
    }

    let now = now_ms();
    let user = User {
        id: data.id.clone(),
        username,
        display_name: data.display_name,
        avatar: data.avatar,
        bio: data.bio,
        is_online: true,
        last_seen: now,
        is_deleted: false,
        recovery_code: Some(crypto::generate_recovery_code()),
    };
    let public = user.public_view();
    state.users.insert(data.id.clone(), user);

    ctx.user_id = Some(data.id.clone());
    registry.bind(&data.id, ctx.conn_id);
    let online = registry.online_user_ids();

    tracing::info!("User {} registered", data.id);

    let Some(snapshot) = state.snapshot_for(&data.id, true, online.clone()) else {
        return Reply::none();
    };

    Reply::persist(vec![
        Outbound::to_origin(ServerEvent::RegisterSuccess(Box::new(snapshot))),
        Outbound::broadcast(
            ServerEvent::UserJoined {
                user: public,
                online_user_ids: online,
            },
            true,
        ),
    ])
}

pub fn login(
    state: &mut State,
    registry: &SessionRegistry,
    ctx: &mut SessionCtx,
    user_id: &str,
) -> Reply {
    let known = state
        .users
        .get(user_id)
        .map(|u| !u.is_deleted)
        .unwrap_or(false);
    if !known {
        return Reply::send(vec![Outbound::to_origin(ServerEvent::LoginError {
            reason: "user_not_found".to_string(),
        })]);
    }

    finish_login(state, registry, ctx, user_id)
}

pub fn login_recovery(
    state: &mut State,
    registry: &SessionRegistry,
    ctx: &mut SessionCtx,
    recovery_code: &str,
) -> Reply {
    let wanted = crypto::normalize_recovery_code(recovery_code);
    let found = state
        .users
        .values()
        .find(|u| {
            !u.is_deleted
                && u.recovery_code
                    .as_deref()
                    .map(|code| crypto::normalize_recovery_code(code) == wanted)
                    .unwrap_or(false)
        })
        .map(|u| u.id.clone());

    let Some(user_id) = found else {
        return Reply::send(vec![Outbound::to_origin(ServerEvent::LoginError {
            reason: "invalid_recovery_code".to_string(),
        })]);
    };

    finish_login(state, registry, ctx, &user_id)
}

/// Shared login tail: mark online, bind, promote pending deliveries,
/// push the snapshot.
fn finish_login(
    state: &mut State,
    registry: &SessionRegistry,
    ctx: &mut SessionCtx,
    user_id: &str,
) -> Reply {
    if let Some(user) = state.users.get_mut(user_id) {
        user.is_online = true;
        user.last_seen = now_ms();
    }

    let delivered = state.promote_sent_to_delivered(user_id);

    ctx.user_id = Some(user_id.to_string());
    registry.bind(user_id, ctx.conn_id);
    let online = registry.online_user_ids();

    tracing::info!("User {} logged in", user_id);

    let Some(snapshot) = state.snapshot_for(user_id, false, online.clone()) else {
        return Reply::none();
    };

    let mut events = vec![
        Outbound::to_origin(ServerEvent::LoginSuccess(Box::new(snapshot))),
        Outbound::broadcast(
            ServerEvent::UserOnline {
                user_id: user_id.to_string(),
                online_user_ids: online,
            },
            true,
        ),
    ];
    if !delivered.is_empty() {
        events.push(Outbound::broadcast(
            ServerEvent::MessagesBatchDelivered { messages: delivered },
            false,
        ));
    }

    Reply::persist(events)
}

pub fn check_username(state: &State, username: &str) -> Reply {
    let username = username.trim();
    if username.is_empty() {
        return Reply::none();
    }

    Reply::send(vec![Outbound::to_origin(ServerEvent::UsernameCheckResult {
        username: username.to_string(),
        available: !state.username_taken(username, None),
    })])
}

pub fn search_user(state: &State, me: &str, query: &str) -> Reply {
    let query = query.trim().to_lowercase();

    let users = if query.is_empty() {
        Vec::new()
    } else {
        state
            .users
            .values()
            .filter(|u| {
                !u.is_deleted
                    && u.id != me
                    && (u.username.to_lowercase().contains(&query)
                        || u.display_name.to_lowercase().contains(&query))
            })
            .map(User::public_view)
            .collect()
    };

    Reply::send(vec![Outbound::to_origin(ServerEvent::SearchResult {
        users,
    })])
}
