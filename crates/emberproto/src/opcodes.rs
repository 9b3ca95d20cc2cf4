//! Opcode and level constants for the supported protocol revisions.
//!
//! Values were recovered from packet captures of the live service; where a
//! packet's interior is game content the opcode alone is named here and
//! the body stays opaque.

/// Direction markers carried in the low byte of the client channel field.
pub const MARK_C2S: u8 = 0x00;
pub const MARK_S2C: u8 = 0xDD;

/// Dispatch levels observed on the client link.
pub const LEVEL_WORLD: u8 = 0x01;
pub const LEVEL_STATE: u8 = 0x02;
pub const LEVEL_ENTRY: u8 = 0x05;

// Client -> server.
pub const OP_ENTER_WORLD: u16 = 0x0000; // level WORLD
pub const OP_FINISH_STATE: u16 = 0x0001; // level STATE
pub const OP_PING: u16 = 0x0012; // level STATE
pub const OP_LOBBY_OPTIONS: u16 = 0x001F; // level WORLD, v1 only
pub const OP_CLIENT_0D7C: u16 = 0x0D7C; // level WORLD, swallowed telemetry
pub const OP_CLIENT_E4FB: u16 = 0xE4FB; // level WORLD, v3 only, swallowed
pub const OP_CHARACTER_LIST: u16 = 0xE17B; // level WORLD
pub const OP_CLIENT_0438: u16 = 0x0438; // level ENTRY, arrives pre-decrypted upstream
pub const OP_RELOGIN: u16 = 0x0088; // level ENTRY
pub const OP_ENTER_STEP_1: u16 = 0x008A; // level ENTRY, v3 staged entry
pub const OP_ENTER_STEP_2: u16 = 0x008B;
pub const OP_ENTER_STEP_3: u16 = 0x008C;
pub const OP_ENTER_STEP_4: u16 = 0x008D;
pub const OP_ENTER_STEP_5: u16 = 0x008E;
pub const OP_ENTER_STEP_6: u16 = 0x008F;

// Server -> client.
pub const OP_ENTER_WORLD_ACK: u16 = 0x0000; // level WORLD
pub const OP_CHANGE_STATE: u16 = 0x0000; // level STATE
pub const OP_SET_GAME_TYPE: u16 = 0x000F; // level STATE
pub const OP_PONG: u16 = 0x0013; // level STATE
pub const OP_GOODBYE: u16 = 0x01F1; // level ENTRY
pub const OP_GOODBYE_TAIL: u16 = 0x01E5; // level ENTRY

// Login-server link (flat opcode space).
pub const PEER_OP_REGISTER: u16 = 0x0000; // gateway -> login
pub const PEER_OP_REGISTER_RESULT: u16 = 0x0000; // login -> gateway
pub const PEER_OP_ACCOUNT_HANDOFF: u16 = 0x0001; // login -> gateway

/// Startup-selected protocol revision. Exactly one packet table is active
/// per process run; the revisions differ in wire layout, not just in
/// which opcodes exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientVersion {
    V1,
    V3,
}

impl ClientVersion {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1" => Some(Self::V1),
            "3" => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "1",
            Self::V3 => "3",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ClientVersion;

    #[test]
    fn version_selector_parses_known_revisions() {
        assert_eq!(ClientVersion::parse("1"), Some(ClientVersion::V1));
        assert_eq!(ClientVersion::parse(" 3 "), Some(ClientVersion::V3));
        assert_eq!(ClientVersion::parse("2"), None);
        assert_eq!(ClientVersion::parse(""), None);
    }
}
