//! Liveness probe

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let users = state.store.lock().await.users.len();

    Json(json!({
        "status": "ok",
        "users": users,
        "online": state.registry.online_count(),
    }))
}
