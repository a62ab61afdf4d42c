//! Shared test harness: drives the command router and registry directly,
//! no sockets involved. Each simulated client owns a connection ID and
//! the receiving end of its event channel.

#![allow(dead_code)]

use serde_json::json;
use tokio::sync::mpsc;

use chathub_server::handlers::{self, SessionCtx};
use chathub_server::models::{ClientCommand, ServerEvent};
use chathub_server::store::State;
use chathub_server::websocket::{SessionRegistry, EVENT_BUFFER_SIZE};

pub struct Harness {
    pub state: State,
    pub registry: SessionRegistry,
}

pub struct Client {
    pub ctx: SessionCtx,
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl Client {
    /// Everything delivered to this client since the last drain
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            state: State::default(),
            registry: SessionRegistry::new(),
        }
    }

    pub fn connect(&self) -> Client {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let conn_id = self.registry.register_conn(tx);
        Client {
            ctx: SessionCtx::new(conn_id),
            rx,
        }
    }

    /// The socket-close path: unbind and mark offline
    pub fn disconnect(&mut self, client: &mut Client) {
        self.registry.remove_conn(client.ctx.conn_id);
        if let Some(user_id) = client.ctx.user_id.take() {
            if self.registry.unbind_if_owner(&user_id, client.ctx.conn_id) {
                if let Some(user) = self.state.users.get_mut(&user_id) {
                    user.is_online = false;
                }
            }
        }
    }

    /// Decode and dispatch one wire command
    pub fn exec(&mut self, client: &mut Client, command: serde_json::Value) {
        let command: ClientCommand = serde_json::from_value(command).expect("decodable command");
        let reply = handlers::route(&mut self.state, &self.registry, &mut client.ctx, command);
        self.registry.dispatch(client.ctx.conn_id, reply.events);
    }

    /// Register a user whose username equals their ID; returns the events
    /// delivered to the registering client.
    pub fn register(&mut self, client: &mut Client, id: &str) -> Vec<ServerEvent> {
        self.exec(
            client,
            json!({
                "type": "register",
                "data": { "user": { "id": id, "username": id } }
            }),
        );
        client.drain()
    }

    pub fn login(&mut self, client: &mut Client, id: &str) -> Vec<ServerEvent> {
        self.exec(
            client,
            json!({
                "type": "login",
                "data": { "userId": id }
            }),
        );
        client.drain()
    }

    pub fn send_message(
        &mut self,
        client: &mut Client,
        id: &str,
        sender: &str,
        receiver: &str,
        text: &str,
    ) {
        self.exec(
            client,
            json!({
                "type": "send_message",
                "data": {
                    "message": {
                        "id": id,
                        "senderId": sender,
                        "receiverId": receiver,
                        "text": text
                    }
                }
            }),
        );
    }
}
