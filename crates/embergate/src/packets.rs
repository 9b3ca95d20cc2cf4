//! Outbound packet builders and captured reply blobs.
//!
//! The structured packets are rebuilt field for field; the blobs are wire
//! images replayed from packet logs of the live service. Blob interiors
//! are game content and stay opaque here; only their framing matters to
//! the transport.

use bytes::{BufMut, Bytes, BytesMut};
use emberproto::opcodes::{
    ClientVersion, LEVEL_ENTRY, LEVEL_STATE, LEVEL_WORLD, OP_CHANGE_STATE, OP_ENTER_WORLD_ACK,
    OP_GOODBYE, OP_GOODBYE_TAIL, OP_PONG, OP_SET_GAME_TYPE, PEER_OP_REGISTER,
};
use emberproto::packet::{from_hex, Packet};

// Lobby priming volley, v3.
const LOBBY_GREETING: &str = "1400dd05c1e7e3865627f6cf97087265899fe9242174";
const LOBBY_STAGE_KEY: &str =
    "2a00dd057f20f4c282625271b0cb11257381d3e43840dba6f90b2c06a99043486eefcd4b6745f31f35e70901";
const LOBBY_ROSTER: &str = "1800dd054863a207d5af754516e6b9895827f7c897704010e0b0";
const LOBBY_SEAL: &str = "0900dd052cb90d5311427a";

// Lobby priming volley, v1.
const INITIAL_CONFIG: &str = "1e00dd0105000a006d61696c2e656d6265722e696f0007003e320f0f79003300";
const CHAT_SPAM_DELAY: &str = "1400dd01cb0000000000000000000000000000000000";

// v1 visual-options reply pair.
const LOBBY_OPTIONS_A: &str =
    "2700dd01c001ff091a000b004a757374746f636865636b10006368617261637465725f6f7074696f6e";
const LOBBY_OPTIONS_B: &str = "0d00dd013a00000000000000000000";

// Character-list flow.
const CHAR_PREFACE_A: &str = "0700dd050cbd7b5010";
const CHAR_PREFACE_B: &str = "1c00dd05d0635d04d5af754516e6b9895827f7c897704010e0b08151ec4f";
const CHAR_LIST: &str = "4000dd051e05acb68556f261c495603654b3cb183376e4b591b032f0a3f1145673bec8196e6492d9ee3f4690acf7111c72a0ca052a138bc0f024570066be44aa0917";
const CHAR_LIST_EMPTY: &str = "0800dd05fea1c9531140";
const CHAR_TRAILER: &str =
    "2400dd0564f11f825223f4c495643405d55a754516e634b7d47df7c797704010e0b081514272";

fn blob(hex: &str) -> Packet {
    Packet::preframed(from_hex(hex).expect("static capture blob"))
}

pub fn pong(tm: i64, when: i64, local: i32) -> Packet {
    let mut b = BytesMut::with_capacity(20);
    b.put_i64_le(tm);
    b.put_i64_le(when);
    b.put_i32_le(local);
    Packet::client(LEVEL_STATE, OP_PONG, b.freeze())
}

pub fn change_state(state: i32) -> Packet {
    let mut b = BytesMut::with_capacity(4);
    b.put_i32_le(state);
    Packet::client(LEVEL_STATE, OP_CHANGE_STATE, b.freeze())
}

pub fn set_game_type() -> Packet {
    Packet::client(LEVEL_STATE, OP_SET_GAME_TYPE, Bytes::from_static(&[0u8; 4]))
}

/// Reply confirming world entry; the v3 form carries the revision echo.
pub fn enter_world_ack(version: ClientVersion) -> Packet {
    let body = match version {
        ClientVersion::V1 => Bytes::from_static(&[0u8; 8]),
        ClientVersion::V3 => Bytes::from_static(&[0u8; 12]),
    };
    Packet::client(LEVEL_WORLD, OP_ENTER_WORLD_ACK, body)
}

/// The relogin goodbye pair; the client closes after these.
pub fn goodbye() -> [Packet; 2] {
    [
        Packet::client(LEVEL_ENTRY, OP_GOODBYE, Bytes::new()),
        Packet::client(LEVEL_ENTRY, OP_GOODBYE_TAIL, Bytes::from_static(&[0u8; 4])),
    ]
}

/// Reply for one staged entry ack. The sixth step advances silently; the
/// client needs no reply to finish the sequence.
pub fn entry_ack(step: u8) -> Option<Packet> {
    let (opcode, payload) = match step {
        1 => (0x0038, "3829157ba816db9091832208"),
        2 => (0x0037, "371947b88e92319e86b07772"),
        3 => (0x0039, "390aeda4c3949e6a5b4ac068"),
        4 => (0x003F, "3f0b469961e9f541a6af4e8d"),
        5 => (0x0033, "33b1d74ae4c48857e02bab7e"),
        _ => return None,
    };
    Some(Packet::client(
        LEVEL_ENTRY,
        opcode,
        from_hex(payload).expect("static capture blob"),
    ))
}

/// State-zero lobby priming volley, in reply order.
pub fn lobby_primer(version: ClientVersion) -> Vec<Packet> {
    match version {
        ClientVersion::V1 => vec![set_game_type(), blob(INITIAL_CONFIG), blob(CHAT_SPAM_DELAY)],
        ClientVersion::V3 => vec![
            blob(LOBBY_GREETING),
            set_game_type(),
            blob(LOBBY_STAGE_KEY),
            blob(LOBBY_ROSTER),
            blob(LOBBY_SEAL),
        ],
    }
}

/// v1 visual-options reply.
pub fn lobby_options() -> Vec<Packet> {
    vec![blob(LOBBY_OPTIONS_A), blob(LOBBY_OPTIONS_B)]
}

/// Character-list volley; the roster blob depends on whether the account
/// has characters.
pub fn character_list(populated: bool) -> Vec<Packet> {
    let roster = if populated {
        blob(CHAR_LIST)
    } else {
        blob(CHAR_LIST_EMPTY)
    };
    vec![
        blob(CHAR_PREFACE_A),
        blob(CHAR_PREFACE_B),
        roster,
        blob(CHAR_TRAILER),
    ]
}

/// Registration announcement sent to the login server on connect.
pub fn peer_register(server_name: &str, client_port: u16) -> Packet {
    let mut b = BytesMut::with_capacity(server_name.len() + 3);
    b.put_slice(server_name.as_bytes());
    b.put_u8(0);
    b.put_u16_le(client_port);
    Packet::peer(PEER_OP_REGISTER, b.freeze())
}
