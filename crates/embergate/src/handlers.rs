//! Packet handlers for both connection roles.
//!
//! Handlers run on the task that decoded the frame, one at a time per
//! connection, with exclusive access to that connection's context. A
//! handler error is caught at the dispatch boundary and costs only the
//! offending connection.

use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use emberio::conn::{ConnHandle, Inbound};
use emberproto::opcodes::ClientVersion;
use emberproto::packet::{read_client_header, read_peer_opcode, Packet};
use emberproto::reader::PacketReader;
use tracing::{debug, info, trace, warn};

use crate::dispatch::{BoxFuture, Registry};
use crate::handshake::EntrySequence;
use crate::packets;
use crate::session::{Account, SessionDir};

/// Slot holding the currently registered login-server connection.
#[derive(Clone)]
pub struct LoginLink {
    inner: Arc<tokio::sync::Mutex<Option<ConnHandle>>>,
}

impl LoginLink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub async fn set(&self, conn: ConnHandle) {
        *self.inner.lock().await = Some(conn);
    }

    pub async fn current(&self) -> Option<ConnHandle> {
        self.inner.lock().await.clone()
    }

    /// Clear only if `conn` is still the registered link; a reconnect may
    /// already have replaced it.
    pub async fn clear_if(&self, conn: &ConnHandle) {
        let mut cur = self.inner.lock().await;
        if cur.as_ref().is_some_and(|c| c.same_conn(conn)) {
            *cur = None;
        }
    }
}

impl Default for LoginLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection state a client handler works against. Owned by the
/// connection's receive task; nothing here is shared across connections
/// except the directory itself.
pub struct ClientCx {
    pub conn: ConnHandle,
    pub sessions: SessionDir,
    pub version: ClientVersion,
    pub entry: EntrySequence,
    pub account: Option<Account>,
}

impl ClientCx {
    pub async fn send(&self, packet: Packet) {
        self.conn.send(packet.compile()).await;
    }
}

/// Same, for the login-server link.
pub struct PeerCx {
    pub conn: ConnHandle,
    pub sessions: SessionDir,
    pub version: ClientVersion,
    pub link: LoginLink,
}

/// Client-facing connection role: parse the level/opcode head, look the
/// pair up, run the handler.
pub struct ClientRole {
    cx: ClientCx,
    registry: Arc<Registry>,
}

impl ClientRole {
    pub fn new(
        conn: ConnHandle,
        registry: Arc<Registry>,
        sessions: SessionDir,
        version: ClientVersion,
    ) -> Self {
        Self {
            cx: ClientCx {
                conn,
                sessions,
                version,
                entry: EntrySequence::new(),
                account: None,
            },
            registry,
        }
    }
}

#[async_trait::async_trait]
impl Inbound for ClientRole {
    async fn on_frame(&mut self, frame: Bytes) -> Result<()> {
        let mut r = PacketReader::new(frame);
        let hdr = match read_client_header(&mut r) {
            Ok(hdr) => hdr,
            Err(e) => {
                debug!(peer = %self.cx.conn.peer(), err = %e, "runt client frame; ignoring");
                return Ok(());
            }
        };
        let Some(handler) = self.registry.client_lookup(hdr.level, hdr.opcode) else {
            // Not an error: a packet nobody registered for is a message
            // this server chooses not to care about.
            trace!(
                peer = %self.cx.conn.peer(),
                level = hdr.level,
                opcode = format_args!("{:#06x}", hdr.opcode),
                "unhandled client opcode"
            );
            return Ok(());
        };
        handler(&mut self.cx, r).await
    }

    async fn on_close(&mut self) {
        if let Some(acct) = self.cx.account.take() {
            self.cx.sessions.release(acct.session, &self.cx.conn).await;
            info!(
                account = %acct.name,
                account_id = acct.account_id,
                session = acct.session,
                "client disconnected"
            );
        }
    }
}

/// Login-server connection role: flat opcode space, same driver.
pub struct PeerRole {
    cx: PeerCx,
    registry: Arc<Registry>,
}

impl PeerRole {
    pub fn new(
        conn: ConnHandle,
        registry: Arc<Registry>,
        sessions: SessionDir,
        link: LoginLink,
        version: ClientVersion,
    ) -> Self {
        Self {
            cx: PeerCx {
                conn,
                sessions,
                version,
                link,
            },
            registry,
        }
    }
}

#[async_trait::async_trait]
impl Inbound for PeerRole {
    async fn on_frame(&mut self, frame: Bytes) -> Result<()> {
        let mut r = PacketReader::new(frame);
        let opcode = match read_peer_opcode(&mut r) {
            Ok(op) => op,
            Err(e) => {
                debug!(peer = %self.cx.conn.peer(), err = %e, "runt peer frame; ignoring");
                return Ok(());
            }
        };
        let Some(handler) = self.registry.peer_lookup(opcode) else {
            trace!(
                peer = %self.cx.conn.peer(),
                opcode = format_args!("{opcode:#06x}"),
                "unhandled peer opcode"
            );
            return Ok(());
        };
        handler(&mut self.cx, r).await
    }

    async fn on_close(&mut self) {
        self.cx.link.clear_if(&self.cx.conn).await;
        warn!(peer = %self.cx.conn.peer(), "login server link closed");
    }
}

// ---- client handlers -------------------------------------------------

pub(crate) fn ping(cx: &mut ClientCx, mut r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let tm = r.read_i64_le()?;
        let when = r.read_i64_le()?;
        let local = r.read_i32_le()?;
        cx.send(packets::pong(tm, when, local)).await;
        Ok(())
    })
}

/// World-entry authorization: the login gate. No matching handoff means
/// the connection is dropped without a reply.
pub(crate) fn enter_world(cx: &mut ClientCx, mut r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let (account_id, cookie) = match cx.version {
            ClientVersion::V1 => {
                let _p_from = r.read_i32_le()?;
                let _p_to = r.read_i32_le()?;
                let account_id = i64::from(r.read_i32_le()?);
                let cookie = r.read_u32_le()?;
                let _zone_id = r.read_i32_le()?;
                (account_id, cookie)
            }
            ClientVersion::V3 => {
                let _kind = r.read_i16_le()?;
                let _p_from = r.read_i32_le()?;
                let _p_to = r.read_i32_le()?;
                let account_id = r.read_i64_le()?;
                let cookie = r.read_u32_le()?;
                let _zone_id = r.read_i32_le()?;
                (account_id, cookie)
            }
        };

        match cx.sessions.find(cookie, account_id).await {
            None => {
                info!(
                    peer = %cx.conn.peer(),
                    account_id,
                    session = cookie,
                    "world entry without login; dropping"
                );
                cx.conn.dispose();
            }
            Some(account) => {
                info!(
                    account = %account.name,
                    account_id,
                    session = cookie,
                    "world entry authorized"
                );
                cx.sessions.bind(cookie, cx.conn.clone()).await;
                cx.send(packets::enter_world_ack(cx.version)).await;
                cx.send(packets::change_state(-1)).await;
                cx.account = Some(account);
            }
        }
        Ok(())
    })
}

pub(crate) fn finish_state(cx: &mut ClientCx, mut r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let state = r.read_i32_le()?;
        cx.send(packets::change_state(state)).await;
        if state == 0 {
            for p in packets::lobby_primer(cx.version) {
                cx.send(p).await;
            }
        }
        Ok(())
    })
}

async fn entry_step(cx: &mut ClientCx, step: u8) {
    if !cx.entry.fire(step) {
        // Retransmits and out-of-order arrivals expect silence.
        trace!(
            peer = %cx.conn.peer(),
            step,
            completed = cx.entry.completed(),
            "entry ack dropped"
        );
        return;
    }
    if let Some(reply) = packets::entry_ack(step) {
        cx.send(reply).await;
    }
    if cx.entry.finished() {
        info!(peer = %cx.conn.peer(), "world entry sequence complete");
    }
}

pub(crate) fn enter_step_1(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        entry_step(cx, 1).await;
        Ok(())
    })
}

pub(crate) fn enter_step_2(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        entry_step(cx, 2).await;
        Ok(())
    })
}

pub(crate) fn enter_step_3(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        entry_step(cx, 3).await;
        Ok(())
    })
}

pub(crate) fn enter_step_4(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        entry_step(cx, 4).await;
        Ok(())
    })
}

pub(crate) fn enter_step_5(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        entry_step(cx, 5).await;
        Ok(())
    })
}

pub(crate) fn enter_step_6(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        entry_step(cx, 6).await;
        Ok(())
    })
}

pub(crate) fn character_list(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let Some(account) = cx.account.clone() else {
            debug!(peer = %cx.conn.peer(), "character list before authorization; ignoring");
            return Ok(());
        };
        for p in packets::character_list(account.characters > 0) {
            cx.send(p).await;
        }
        Ok(())
    })
}

pub(crate) fn relogin(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        info!(peer = %cx.conn.peer(), "relogin requested; saying goodbye");
        // The client goes back through the login server, which will hand
        // the session off again; the current record is finished.
        if let Some(acct) = cx.account.take() {
            cx.sessions.remove(acct.session).await;
        }
        for p in packets::goodbye() {
            cx.send(p).await;
        }
        Ok(())
    })
}

/// v1 visual-options request.
pub(crate) fn lobby_options(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        for p in packets::lobby_options() {
            cx.send(p).await;
        }
        Ok(())
    })
}

/// Client-side telemetry; parsed for the trace, never answered.
pub(crate) fn swallow_i32(cx: &mut ClientCx, mut r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let value = r.read_i32_le().unwrap_or_default();
        trace!(peer = %cx.conn.peer(), value, "telemetry opcode swallowed");
        Ok(())
    })
}

/// Opaque entry-level opcode; the interesting part never reaches us in
/// the clear.
pub(crate) fn swallow(cx: &mut ClientCx, _r: PacketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        trace!(peer = %cx.conn.peer(), "opaque entry opcode swallowed");
        Ok(())
    })
}

// ---- login-server handlers --------------------------------------------

pub(crate) fn peer_register_result(
    cx: &mut PeerCx,
    mut r: PacketReader,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let ok = r.read_bool()?;
        if ok {
            cx.link.set(cx.conn.clone()).await;
            info!(peer = %cx.conn.peer(), "login server registered");
        } else {
            warn!(peer = %cx.conn.peer(), "login server rejected our registration");
        }
        Ok(())
    })
}

/// The login server prepares an account for world entry; record it and
/// evict a duplicate holder of the same session.
pub(crate) fn peer_account_handoff(
    cx: &mut PeerCx,
    mut r: PacketReader,
) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let account_id = match cx.version {
            ClientVersion::V1 => i64::from(r.read_i32_le()?),
            ClientVersion::V3 => r.read_i64_le()?,
        };
        let name = r.read_cstring()?;
        let token = r.read_cstring()?;
        let access_level = r.read_u8()?;
        let membership = r.read_u8()?;
        let last_ip = r.read_cstring()?;
        let last_entered_unix = r.read_i64_le()?;
        let characters = r.read_u8()?;
        let session = r.read_u32_le()?;

        info!(account = %name, account_id, session, "account handoff from login server");
        cx.sessions
            .register(Account {
                account_id,
                name,
                token,
                access_level,
                membership,
                last_ip,
                last_entered_unix,
                characters,
                session,
            })
            .await;
        Ok(())
    })
}
