//! ChatHub Server library
//!
//! The server is a single-process hub: every client speaks the
//! `{ "type": ..., "data": ... }` envelope over one WebSocket, the hub
//! owns all conversation state in memory and mirrors it to a single
//! JSON document on disk.

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod models;
pub mod store;
pub mod websocket;

use std::sync::Arc;

use crate::config::Config;
use crate::store::Store;
use crate::websocket::SessionRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub registry: Arc<SessionRegistry>,
}
