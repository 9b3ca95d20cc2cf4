//! embergate: world gateway for the reverse-engineered client protocol.
//!
//! Terminates client connections and the sibling login-server link,
//! splits coalesced length-prefixed frames, dispatches by (level, opcode)
//! against the table set for the configured protocol revision, and gates
//! world entry behind the staged handshake.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use emberio::conn::Connection;
use emberio::pool::BufferPool;
use emberproto::opcodes::ClientVersion;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn, Level};

use crate::dispatch::Registry;
use crate::handlers::{ClientRole, LoginLink, PeerRole};
use crate::session::SessionDir;

mod dispatch;
mod handlers;
mod handshake;
mod packets;
mod session;

const RECV_POOL_RETAIN: usize = 64;

fn usage_and_exit() -> ! {
    eprintln!(
        "embergate (world gateway)\n\n\
USAGE:\n  embergate [--client-bind HOST:PORT] [--peer-bind HOST:PORT] [--client-version 1|3]\n\n\
ENV:\n  EMBERGATE_CLIENT_BIND     default 0.0.0.0:1239\n  EMBERGATE_PEER_BIND       default 127.0.0.1:1237\n  EMBERGATE_CLIENT_VERSION  default 3 (selects the packet table set)\n  EMBERGATE_SERVER_NAME     default ember-1 (announced to the login server)\n  EMBERGATE_RECV_BUF        default 4096 (receive buffer size, bytes)\n  EMBERGATE_SEND_PACING_MS  optional; delay between outbound packets\n  EMBERGATE_SEED_ACCOUNTS   optional; JSON file preloading the session directory\n"
    );
    std::process::exit(2);
}

#[derive(Clone, Debug)]
struct Config {
    client_bind: SocketAddr,
    peer_bind: SocketAddr,
    version: ClientVersion,
    server_name: String,
    recv_buf: usize,
    send_pacing: Option<Duration>,
    seed_accounts: Option<PathBuf>,
}

fn parse_args() -> Config {
    let mut client_bind: SocketAddr = std::env::var("EMBERGATE_CLIENT_BIND")
        .unwrap_or_else(|_| "0.0.0.0:1239".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut peer_bind: SocketAddr = std::env::var("EMBERGATE_PEER_BIND")
        .unwrap_or_else(|_| "127.0.0.1:1237".to_string())
        .parse()
        .unwrap_or_else(|_| usage_and_exit());

    let mut version = ClientVersion::parse(
        &std::env::var("EMBERGATE_CLIENT_VERSION").unwrap_or_else(|_| "3".to_string()),
    )
    .unwrap_or_else(|| usage_and_exit());

    let server_name =
        std::env::var("EMBERGATE_SERVER_NAME").unwrap_or_else(|_| "ember-1".to_string());

    let recv_buf = std::env::var("EMBERGATE_RECV_BUF")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4096);

    let send_pacing = std::env::var("EMBERGATE_SEND_PACING_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis);

    let seed_accounts = std::env::var("EMBERGATE_SEED_ACCOUNTS")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--client-bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                client_bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--peer-bind" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                peer_bind = v.parse().unwrap_or_else(|_| usage_and_exit());
            }
            "--client-version" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                version = ClientVersion::parse(&v).unwrap_or_else(|| usage_and_exit());
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }

    Config {
        client_bind,
        peer_bind,
        version,
        server_name,
        recv_buf,
        send_pacing,
        seed_accounts,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,embergate=info".into()),
        )
        .with_target(false)
        .with_max_level(Level::INFO)
        .init();

    let cfg = Arc::new(parse_args());
    let registry = Arc::new(Registry::build(cfg.version));
    let sessions = SessionDir::new();
    if let Some(path) = &cfg.seed_accounts {
        match sessions.load_seed(path).await {
            Ok(n) => info!(count = n, path = %path.display(), "seed accounts loaded"),
            Err(e) => warn!(path = %path.display(), err = %e, "seed accounts not loaded"),
        }
    }
    let pool = BufferPool::new(cfg.recv_buf, RECV_POOL_RETAIN);
    let link = LoginLink::new();

    let client_listener = TcpListener::bind(cfg.client_bind).await?;
    let peer_listener = TcpListener::bind(cfg.peer_bind).await?;
    info!(
        client_bind = %cfg.client_bind,
        peer_bind = %cfg.peer_bind,
        version = cfg.version.as_str(),
        "gateway listening"
    );

    {
        let pool = pool.clone();
        let sessions = sessions.clone();
        let registry = registry.clone();
        let link = link.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            if let Err(e) = accept_peers(peer_listener, pool, sessions, registry, link, cfg).await {
                warn!(err = %e, "peer listener stopped");
            }
        });
    }

    loop {
        let (stream, peer) = client_listener.accept().await?;
        info!(peer = %peer, "client connected");
        let pool = pool.clone();
        let sessions = sessions.clone();
        let registry = registry.clone();
        let cfg = cfg.clone();
        tokio::spawn(handle_client(stream, peer, pool, sessions, registry, cfg));
    }
}

async fn accept_peers(
    listener: TcpListener,
    pool: BufferPool,
    sessions: SessionDir,
    registry: Arc<Registry>,
    link: LoginLink,
    cfg: Arc<Config>,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(peer = %peer, "login server connected");
        if link.current().await.is_some() {
            warn!(peer = %peer, "another login server connected; the newest registration wins");
        }
        let pool = pool.clone();
        let sessions = sessions.clone();
        let registry = registry.clone();
        let link = link.clone();
        let cfg = cfg.clone();
        tokio::spawn(handle_peer(stream, peer, pool, sessions, registry, link, cfg));
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    pool: BufferPool,
    sessions: SessionDir,
    registry: Arc<Registry>,
    cfg: Arc<Config>,
) {
    let (rd, wr) = stream.into_split();
    let (conn, handle) = Connection::open(rd, wr, peer, &pool, cfg.send_pacing);
    let role = ClientRole::new(handle, registry, sessions, cfg.version);
    let started = std::time::Instant::now();
    conn.run(role).await;
    info!(
        peer = %peer,
        connected_secs = started.elapsed().as_secs(),
        "client connection closed"
    );
}

async fn handle_peer(
    stream: TcpStream,
    peer: SocketAddr,
    pool: BufferPool,
    sessions: SessionDir,
    registry: Arc<Registry>,
    link: LoginLink,
    cfg: Arc<Config>,
) {
    let (rd, wr) = stream.into_split();
    let (conn, handle) = Connection::open(rd, wr, peer, &pool, cfg.send_pacing);
    // Announce ourselves first; the reply lands in the register-result
    // handler and records this link as the active login server.
    handle
        .send(packets::peer_register(&cfg.server_name, cfg.client_bind.port()).compile())
        .await;
    let role = PeerRole::new(handle, registry, sessions, link, cfg.version);
    conn.run(role).await;
}
