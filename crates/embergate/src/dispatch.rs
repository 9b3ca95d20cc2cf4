//! Dispatch tables: (level, opcode) → handler for client connections, a
//! flat opcode table for the login-server link.
//!
//! Tables are built once at startup for the selected protocol revision
//! and shared read-only across every connection of a role. Registration
//! is last-wins; a lookup miss means "this server does not care about
//! that packet" and never costs the connection anything.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use emberproto::opcodes::{self as op, ClientVersion};
use emberproto::reader::PacketReader;

use crate::handlers::{self, ClientCx, PeerCx};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler for one client (level, opcode) pair. Runs on the task that
/// decoded the frame, with exclusive access to the connection context.
pub type ClientHandler = for<'a> fn(&'a mut ClientCx, PacketReader) -> BoxFuture<'a, Result<()>>;

/// Handler for one login-server opcode.
pub type PeerHandler = for<'a> fn(&'a mut PeerCx, PacketReader) -> BoxFuture<'a, Result<()>>;

pub struct Registry {
    client: HashMap<u8, HashMap<u16, ClientHandler>>,
    peer: HashMap<u16, PeerHandler>,
}

impl Registry {
    /// Build the table set for one protocol revision. The revisions are
    /// mutually exclusive; only one registry exists per process run.
    pub fn build(version: ClientVersion) -> Self {
        let mut reg = Self {
            client: HashMap::new(),
            peer: HashMap::new(),
        };

        reg.register_peer(op::PEER_OP_REGISTER_RESULT, handlers::peer_register_result);
        reg.register_peer(op::PEER_OP_ACCOUNT_HANDOFF, handlers::peer_account_handoff);

        reg.register_client(op::LEVEL_WORLD, op::OP_ENTER_WORLD, handlers::enter_world);
        reg.register_client(op::LEVEL_STATE, op::OP_PING, handlers::ping);
        reg.register_client(op::LEVEL_STATE, op::OP_FINISH_STATE, handlers::finish_state);
        reg.register_client(op::LEVEL_WORLD, op::OP_CLIENT_0D7C, handlers::swallow_i32);
        reg.register_client(op::LEVEL_WORLD, op::OP_CHARACTER_LIST, handlers::character_list);
        reg.register_client(op::LEVEL_ENTRY, op::OP_CLIENT_0438, handlers::swallow);
        reg.register_client(op::LEVEL_ENTRY, op::OP_RELOGIN, handlers::relogin);

        match version {
            ClientVersion::V1 => {
                reg.register_client(op::LEVEL_WORLD, op::OP_LOBBY_OPTIONS, handlers::lobby_options);
            }
            ClientVersion::V3 => {
                reg.register_client(op::LEVEL_WORLD, op::OP_CLIENT_E4FB, handlers::swallow_i32);
                reg.register_client(op::LEVEL_ENTRY, op::OP_ENTER_STEP_1, handlers::enter_step_1);
                reg.register_client(op::LEVEL_ENTRY, op::OP_ENTER_STEP_2, handlers::enter_step_2);
                reg.register_client(op::LEVEL_ENTRY, op::OP_ENTER_STEP_3, handlers::enter_step_3);
                reg.register_client(op::LEVEL_ENTRY, op::OP_ENTER_STEP_4, handlers::enter_step_4);
                reg.register_client(op::LEVEL_ENTRY, op::OP_ENTER_STEP_5, handlers::enter_step_5);
                reg.register_client(op::LEVEL_ENTRY, op::OP_ENTER_STEP_6, handlers::enter_step_6);
            }
        }
        reg
    }

    fn register_client(&mut self, level: u8, opcode: u16, handler: ClientHandler) {
        // Last registration wins, silently; revision tables overlay base
        // entries the same way.
        self.client.entry(level).or_default().insert(opcode, handler);
    }

    fn register_peer(&mut self, opcode: u16, handler: PeerHandler) {
        self.peer.insert(opcode, handler);
    }

    pub fn client_lookup(&self, level: u8, opcode: u16) -> Option<ClientHandler> {
        self.client.get(&level).and_then(|t| t.get(&opcode)).copied()
    }

    pub fn peer_lookup(&self, opcode: u16) -> Option<PeerHandler> {
        self.peer.get(&opcode).copied()
    }
}
