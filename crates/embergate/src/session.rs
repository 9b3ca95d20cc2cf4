use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use emberio::conn::ConnHandle;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Account record as handed over by the login server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: i64,
    pub name: String,
    pub token: String,
    pub access_level: u8,
    pub membership: u8,
    pub last_ip: String,
    pub last_entered_unix: i64,
    pub characters: u8,
    /// Session cookie minted by the login server; the directory key.
    pub session: u32,
}

struct Entry {
    account: Account,
    conn: Option<ConnHandle>,
}

/// Which (cookie, account) pairs are currently authorized, and which live
/// connection holds each session. Shared by the client and peer roles;
/// the check-evict-record sequence for a fresh handoff runs under one
/// lock.
#[derive(Clone)]
pub struct SessionDir {
    inner: Arc<tokio::sync::Mutex<HashMap<u32, Entry>>>,
}

impl SessionDir {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Authorization lookup for world entry. Both the cookie and the
    /// account id must match the handoff.
    pub async fn find(&self, session: u32, account_id: i64) -> Option<Account> {
        let m = self.inner.lock().await;
        m.get(&session)
            .filter(|e| e.account.account_id == account_id)
            .map(|e| e.account.clone())
    }

    /// Record a fresh handoff. If the same (cookie, account) is already
    /// present the older holder loses: a still-open connection is
    /// disposed, a connectionless record is simply replaced. The new
    /// record is authoritative either way.
    pub async fn register(&self, account: Account) {
        let mut m = self.inner.lock().await;
        if let Some(prev) = m.get_mut(&account.session) {
            if prev.account.account_id == account.account_id {
                match prev.conn.take() {
                    Some(conn) => {
                        conn.dispose();
                        info!(
                            account = %prev.account.name,
                            session = account.session,
                            "logged in twice; older connection dropped"
                        );
                    }
                    None => {
                        info!(
                            account = %prev.account.name,
                            session = account.session,
                            "stale session record replaced"
                        );
                    }
                }
            }
        }
        let name = account.name.clone();
        let session = account.session;
        m.insert(session, Entry {
            account,
            conn: None,
        });
        info!(account = %name, session, "session authorized");
    }

    /// Associate the live connection once world entry authorizes it.
    pub async fn bind(&self, session: u32, conn: ConnHandle) {
        let mut m = self.inner.lock().await;
        if let Some(e) = m.get_mut(&session) {
            e.conn = Some(conn);
        }
    }

    /// Drop the record when its connection goes away. A no-op if a newer
    /// connection has taken the session over in the meantime.
    pub async fn release(&self, session: u32, conn: &ConnHandle) {
        let mut m = self.inner.lock().await;
        let held_by_us = m
            .get(&session)
            .and_then(|e| e.conn.as_ref())
            .is_some_and(|c| c.same_conn(conn));
        if held_by_us {
            m.remove(&session);
        }
    }

    pub async fn remove(&self, session: u32) -> Option<Account> {
        self.inner.lock().await.remove(&session).map(|e| e.account)
    }

    /// Preload records from a JSON file, for running the gateway without
    /// a live login server.
    pub async fn load_seed(&self, path: &Path) -> anyhow::Result<usize> {
        let s = std::fs::read_to_string(path)?;
        let accounts: Vec<Account> = serde_json::from_str(&s)?;
        let n = accounts.len();
        for a in accounts {
            self.register(a).await;
        }
        Ok(n)
    }
}

impl Default for SessionDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use emberio::conn::{ConnHandle, Connection};
    use emberio::pool::BufferPool;

    use super::{Account, SessionDir};

    fn account(session: u32, account_id: i64) -> Account {
        Account {
            account_id,
            name: format!("acct-{account_id}"),
            token: "tok".to_string(),
            access_level: 1,
            membership: 0,
            last_ip: "127.0.0.1".to_string(),
            last_entered_unix: 0,
            characters: 2,
            session,
        }
    }

    fn open_conn() -> ConnHandle {
        let pool = BufferPool::new(256, 2);
        let (near, far) = tokio::io::duplex(256);
        let (rd, wr) = tokio::io::split(near);
        let (conn, handle) =
            Connection::open(rd, wr, "127.0.0.1:1239".parse().expect("addr"), &pool, None);
        // Keep the socket pair alive without driving the loop.
        std::mem::forget((conn, far));
        handle
    }

    #[tokio::test]
    async fn find_requires_cookie_and_account_to_match() {
        let dir = SessionDir::new();
        dir.register(account(0x1000, 42)).await;

        assert!(dir.find(0x1000, 42).await.is_some());
        assert!(dir.find(0x1000, 43).await.is_none());
        assert!(dir.find(0x1001, 42).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_login_evicts_older_connection() {
        let dir = SessionDir::new();
        dir.register(account(0x2000, 7)).await;

        let first = open_conn();
        dir.bind(0x2000, first.clone()).await;
        assert!(!first.is_disposed());

        // Same account, same cookie, second login: the older holder loses.
        dir.register(account(0x2000, 7)).await;
        assert!(first.is_disposed());

        let second = open_conn();
        dir.bind(0x2000, second.clone()).await;
        assert!(dir.find(0x2000, 7).await.is_some());
        assert!(!second.is_disposed());
    }

    #[tokio::test]
    async fn stale_record_without_connection_is_replaced() {
        let dir = SessionDir::new();
        dir.register(account(0x3000, 9)).await;
        dir.register(account(0x3000, 9)).await;
        assert!(dir.find(0x3000, 9).await.is_some());
    }

    #[tokio::test]
    async fn release_ignores_a_superseded_connection() {
        let dir = SessionDir::new();
        dir.register(account(0x4000, 5)).await;

        let old = open_conn();
        dir.bind(0x4000, old.clone()).await;

        let new = open_conn();
        dir.bind(0x4000, new.clone()).await;

        // The old connection's teardown must not drop the new holder.
        dir.release(0x4000, &old).await;
        assert!(dir.find(0x4000, 5).await.is_some());

        dir.release(0x4000, &new).await;
        assert!(dir.find(0x4000, 5).await.is_none());
    }

    #[tokio::test]
    async fn seed_file_preloads_directory() {
        let dir = SessionDir::new();
        let path = std::env::temp_dir().join(format!("embergate-seed-{}.json", std::process::id()));
        let accounts = vec![account(0x5000, 1), account(0x5001, 2)];
        std::fs::write(&path, serde_json::to_string(&accounts).expect("json")).expect("write");

        let n = dir.load_seed(&path).await.expect("load");
        assert_eq!(n, 2);
        assert!(dir.find(0x5000, 1).await.is_some());
        assert!(dir.find(0x5001, 2).await.is_some());

        let _ = std::fs::remove_file(&path);
    }
}
