//! `emberproto`: wire protocol for the gateway.
//!
//! Framing is `[u16 length LE][body]`, and one transport read may carry
//! several frames back to back. A client body leads with a u16 channel
//! (high byte = dispatch level, low byte a direction marker) followed by a
//! u16 opcode; the login-server link uses a flat u16 opcode instead.
//! Integers are little-endian throughout; strings are NUL-terminated.
//!
//! Decoders return owned values off `bytes::Bytes` payloads and never read
//! past the frame they were handed.

pub mod opcodes;
pub mod packet;
pub mod reader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    TooShort { need: usize, got: usize },
    Malformed(&'static str),
}

impl std::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtoError::TooShort { need, got } => {
                write!(f, "packet too short: need {need}, got {got}")
            }
            ProtoError::Malformed(s) => write!(f, "malformed packet: {s}"),
        }
    }
}

impl std::error::Error for ProtoError {}
