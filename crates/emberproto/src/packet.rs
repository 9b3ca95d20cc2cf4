use bytes::{BufMut, Bytes, BytesMut};

use crate::opcodes::MARK_S2C;
use crate::reader::PacketReader;
use crate::ProtoError;

/// Leading fields of a client frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHeader {
    pub level: u8,
    pub mark: u8,
    pub opcode: u16,
}

/// Read the `[u16 channel][u16 opcode]` head of a client frame. The
/// channel's high byte selects the dispatch level; the low byte is the
/// direction marker.
pub fn read_client_header(r: &mut PacketReader) -> Result<ClientHeader, ProtoError> {
    let channel = r.read_u16_le()?;
    let opcode = r.read_u16_le()?;
    Ok(ClientHeader {
        level: (channel >> 8) as u8,
        mark: (channel & 0x00FF) as u8,
        opcode,
    })
}

/// Read the flat opcode of a login-server frame.
pub fn read_peer_opcode(r: &mut PacketReader) -> Result<u16, ProtoError> {
    r.read_u16_le()
}

/// One outbound packet. The full wire image (length prefix included) is
/// compiled at send time; captured blobs already carry their prefix and
/// go out verbatim.
#[derive(Debug, Clone)]
pub enum Packet {
    /// Server-to-client packet on one dispatch level.
    Client { level: u8, opcode: u16, body: Bytes },
    /// Packet for the login-server link.
    Peer { opcode: u16, body: Bytes },
    /// Captured wire image, length prefix and all.
    Preframed(Bytes),
}

impl Packet {
    pub fn client(level: u8, opcode: u16, body: impl Into<Bytes>) -> Self {
        Packet::Client {
            level,
            opcode,
            body: body.into(),
        }
    }

    pub fn peer(opcode: u16, body: impl Into<Bytes>) -> Self {
        Packet::Peer {
            opcode,
            body: body.into(),
        }
    }

    pub fn preframed(wire: impl Into<Bytes>) -> Self {
        Packet::Preframed(wire.into())
    }

    /// Compile to the exact byte run for the socket.
    pub fn compile(&self) -> Bytes {
        match self {
            Packet::Client {
                level,
                opcode,
                body,
            } => {
                let len = 4 + body.len();
                debug_assert!(len <= u16::MAX as usize, "client packet body too large");
                let mut out = BytesMut::with_capacity(2 + len);
                out.put_u16_le(len as u16);
                out.put_u16_le(((*level as u16) << 8) | MARK_S2C as u16);
                out.put_u16_le(*opcode);
                out.put_slice(body);
                out.freeze()
            }
            Packet::Peer { opcode, body } => {
                let len = 2 + body.len();
                debug_assert!(len <= u16::MAX as usize, "peer packet body too large");
                let mut out = BytesMut::with_capacity(2 + len);
                out.put_u16_le(len as u16);
                out.put_u16_le(*opcode);
                out.put_slice(body);
                out.freeze()
            }
            Packet::Preframed(wire) => wire.clone(),
        }
    }
}

/// Decode a hex capture (as pulled from packet logs) into bytes.
pub fn from_hex(s: &str) -> Result<Bytes, ProtoError> {
    fn val(c: u8) -> Result<u8, ProtoError> {
        match c {
            b'0'..=b'9' => Ok(c - b'0'),
            b'a'..=b'f' => Ok(c - b'a' + 10),
            b'A'..=b'F' => Ok(c - b'A' + 10),
            _ => Err(ProtoError::Malformed("bad hex digit")),
        }
    }

    let s = s.as_bytes();
    if s.len() % 2 != 0 {
        return Err(ProtoError::Malformed("odd hex length"));
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    for pair in s.chunks_exact(2) {
        out.push((val(pair[0])? << 4) | val(pair[1])?);
    }
    Ok(Bytes::from(out))
}

/// Lowercase hex, for packet trace lines.
pub fn hex_lower(b: &[u8]) -> String {
    const LUT: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(b.len() * 2);
    for &x in b {
        s.push(LUT[(x >> 4) as usize] as char);
        s.push(LUT[(x & 0x0F) as usize] as char);
    }
    s
}
