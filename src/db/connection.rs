use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::db::driver::DatabaseDriver;
use crate::db::events::{EventBus, Subscription};
use crate::db::lock_or_recover;
use crate::db::oracle_driver::OracleDriver;
use crate::db::session::{EngineSettings, Session};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub name: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub service_name: String,
}

impl ConnectionInfo {
    pub fn new(
        name: &str,
        username: &str,
        password: &str,
        host: &str,
        port: u16,
        service_name: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            service_name: service_name.to_string(),
        }
    }

    pub fn connection_string(&self) -> String {
        format!("//{}:{}/{}", self.host, self.port, self.service_name)
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} ({}@{}:{}/{})",
            self.name, self.username, self.host, self.port, self.service_name
        )
    }

    /// Securely clear the password from memory by overwriting with zeros
    /// then releasing the allocation.
    pub fn clear_password(&mut self) {
        // SAFETY: we write zeros over the valid UTF-8 bytes (zeros are valid UTF-8)
        let bytes = unsafe { self.password.as_bytes_mut() };
        for b in bytes.iter_mut() {
            // Use write_volatile to prevent the compiler from optimizing away the zeroing
            unsafe { std::ptr::write_volatile(b, 0) };
        }
        self.password.clear();
        self.password.shrink_to_fit();
    }
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: String::new(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 1521,
            service_name: "ORCL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Added,
    Removed,
    Updated,
    Opened,
    Closed,
    Renamed,
    Reconnected,
    Cloned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub connection_id: String,
    pub status: ConnectionStatus,
    /// Name after the transition.
    pub name: String,
    /// Name before a rename or update; the source name for a clone.
    pub old_name: Option<String>,
}

/// Snapshot of a registered connection. The password is never included.
#[derive(Debug, Clone)]
pub struct Connection {
    id: String,
    info: ConnectionInfo,
    session: Option<Session>,
}

impl Connection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_connected)
    }
}

struct ConnectionRecord {
    info: ConnectionInfo,
    session: Option<Session>,
}

struct ConnectionEntry {
    id: String,
    /// Serializes connect/disconnect/reconnect and their notifications, so
    /// transitions of one connection are published in order.
    lifecycle: tokio::sync::Mutex<()>,
    record: Mutex<ConnectionRecord>,
}

impl ConnectionEntry {
    fn snapshot(&self) -> Connection {
        let record = lock_or_recover(&self.record, "connection record");
        let mut info = record.info.clone();
        info.clear_password();
        Connection {
            id: self.id.clone(),
            info,
            session: record.session.clone(),
        }
    }

    fn name(&self) -> String {
        lock_or_recover(&self.record, "connection record").info.name.clone()
    }

    fn live_session(&self) -> Option<Session> {
        lock_or_recover(&self.record, "connection record")
            .session
            .clone()
            .filter(Session::is_connected)
    }

    fn set_session(&self, session: Option<Session>) -> Option<Session> {
        std::mem::replace(
            &mut lock_or_recover(&self.record, "connection record").session,
            session,
        )
    }
}

struct RegistryInner {
    driver: Arc<dyn DatabaseDriver>,
    settings: EngineSettings,
    entries: Mutex<Vec<Arc<ConnectionEntry>>>,
    events: EventBus<ConnectionEvent>,
}

/// Named connections, their sessions and status notifications.
///
/// One registry is built at startup and handed to whatever needs sessions.
/// Clones share the same registry.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(driver: Arc<dyn DatabaseDriver>, settings: EngineSettings) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                driver,
                settings,
                entries: Mutex::new(Vec::new()),
                events: EventBus::new(),
            }),
        }
    }

    /// Registry backed by the Oracle driver.
    pub fn oracle(settings: EngineSettings) -> Self {
        Self::new(Arc::new(OracleDriver::new()), settings)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn subscribe(&self) -> Subscription<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, entry: &ConnectionEntry, status: ConnectionStatus, old_name: Option<String>) {
        self.inner.events.publish(ConnectionEvent {
            connection_id: entry.id.clone(),
            status,
            name: entry.name(),
            old_name,
        });
    }

    fn entry(&self, id: &str) -> Result<Arc<ConnectionEntry>> {
        lock_or_recover(&self.inner.entries, "connection registry")
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
            .ok_or_else(|| Error::UnknownConnection(id.to_string()))
    }

    fn insert(&self, info: ConnectionInfo) -> Arc<ConnectionEntry> {
        let entry = Arc::new(ConnectionEntry {
            id: Uuid::new_v4().to_string(),
            lifecycle: tokio::sync::Mutex::new(()),
            record: Mutex::new(ConnectionRecord {
                info,
                session: None,
            }),
        });
        lock_or_recover(&self.inner.entries, "connection registry").push(Arc::clone(&entry));
        entry
    }

    pub fn add(&self, info: ConnectionInfo) -> Connection {
        let entry = self.insert(info);
        self.publish(&entry, ConnectionStatus::Added, None);
        entry.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Connection> {
        self.entry(id).ok().map(|entry| entry.snapshot())
    }

    pub fn find_by_name(&self, name: &str) -> Option<Connection> {
        lock_or_recover(&self.inner.entries, "connection registry")
            .iter()
            .find(|entry| entry.name() == name)
            .map(|entry| entry.snapshot())
    }

    pub fn list(&self) -> Vec<Connection> {
        lock_or_recover(&self.inner.entries, "connection registry")
            .iter()
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Disconnects if needed, then forgets the connection.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        self.close_session(&entry).await?;
        lock_or_recover(&self.inner.entries, "connection registry")
            .retain(|candidate| candidate.id != entry.id);
        self.publish(&entry, ConnectionStatus::Removed, None);
        Ok(())
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        let old_name = {
            let mut record = lock_or_recover(&entry.record, "connection record");
            std::mem::replace(&mut record.info.name, new_name.to_string())
        };
        self.publish(&entry, ConnectionStatus::Renamed, Some(old_name));
        Ok(())
    }

    /// Replaces the stored details. A live session keeps running; the new
    /// details apply from the next connect.
    pub async fn update(&self, id: &str, info: ConnectionInfo) -> Result<()> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        let old_name = {
            let mut record = lock_or_recover(&entry.record, "connection record");
            let old = std::mem::replace(&mut record.info, info);
            old.name
        };
        self.publish(&entry, ConnectionStatus::Updated, Some(old_name));
        Ok(())
    }

    /// Registers a disconnected copy named `<name> (copy)`.
    pub fn clone_connection(&self, id: &str) -> Result<Connection> {
        let source = self.entry(id)?;
        let mut info = lock_or_recover(&source.record, "connection record").info.clone();
        let source_name = info.name.clone();
        info.name = self.unique_name(&format!("{source_name} (copy)"));
        let entry = self.insert(info);
        self.publish(&entry, ConnectionStatus::Cloned, Some(source_name));
        Ok(entry.snapshot())
    }

    fn unique_name(&self, base: &str) -> String {
        let taken: Vec<String> = self.list().iter().map(|c| c.name().to_string()).collect();
        if !taken.iter().any(|name| name == base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base} {n}"))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// The connection's session, opening one if it has none.
    pub async fn connect(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        if let Some(session) = entry.live_session() {
            return Ok(session);
        }
        let session = self.open_session(&entry).await?;
        entry.set_session(Some(session.clone()));
        self.publish(&entry, ConnectionStatus::Opened, None);
        Ok(session)
    }

    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        self.close_session(&entry).await
    }

    /// A fresh session. A live one is closed first, so the connection never
    /// holds two.
    pub async fn reconnect(&self, id: &str) -> Result<Session> {
        let entry = self.entry(id)?;
        let _lifecycle = entry.lifecycle.lock().await;
        let was_live = entry.live_session().is_some();
        if was_live {
            self.close_session(&entry).await?;
        } else {
            entry.set_session(None);
        }

        let session = self.open_session(&entry).await?;
        entry.set_session(Some(session.clone()));
        let status = if was_live {
            ConnectionStatus::Opened
        } else {
            ConnectionStatus::Reconnected
        };
        self.publish(&entry, status, None);
        Ok(session)
    }

    /// Closes every session; used at shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<Arc<ConnectionEntry>> =
            lock_or_recover(&self.inner.entries, "connection registry").clone();
        for entry in entries {
            let _lifecycle = entry.lifecycle.lock().await;
            if let Err(err) = self.close_session(&entry).await {
                eprintln!("Warning: failed to close connection `{}`: {err}", entry.name());
            }
        }
    }

    /// Caller holds the entry's lifecycle lock.
    async fn close_session(&self, entry: &ConnectionEntry) -> Result<()> {
        let Some(session) = entry.set_session(None) else {
            return Ok(());
        };
        let was_live = session.is_connected();
        session.close().await?;
        if was_live {
            self.publish(entry, ConnectionStatus::Closed, None);
        }
        Ok(())
    }

    async fn open_session(&self, entry: &ConnectionEntry) -> Result<Session> {
        let info = lock_or_recover(&entry.record, "connection record").info.clone();
        let driver = Arc::clone(&self.inner.driver);
        let name = info.name.clone();
        let connected = tokio::task::spawn_blocking(move || driver.connect(&info)).await?;
        let driver_session = connected.map_err(|err| Error::Connect(err.to_string()))?;
        Ok(Session::new(&name, driver_session, self.inner.settings.clone()))
    }
}
