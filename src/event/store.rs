// =============================================================================
// EventStore — optional durable (or in-memory) event history
// =============================================================================

use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::model::Event;

/// Abstract persistence/query surface for the event bus's history. A
/// `None` store (the default for single-shot or test runs) simply skips
/// persistence — `EventBus::publish` already treats `persist` and "a store
/// is bound" as independent conditions.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: &Event) -> Result<()>;
    async fn query_recent(&self, limit: usize) -> Result<Vec<Event>>;
    async fn query_by_subject(&self, subject: &str, limit: usize) -> Result<Vec<Event>>;
    /// Drop events older than the store's retention policy. A no-op for
    /// stores with no retention window.
    async fn cleanup(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// SQLite-backed store. All writes and reads are serialised through a
/// single [`rusqlite::Connection`] guarded by a [`tokio::sync::Mutex`] and
/// run via `spawn_blocking`, since `rusqlite` connections are not `Send`
/// across an `.await` otherwise and SQLite itself only ever wants one
/// writer at a time.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    retention: chrono::Duration,
}

impl SqliteEventStore {
    pub fn open(path: impl AsRef<Path>, retention_days: i64) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening event store at {}", path.as_ref().display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS events (
                 event_id   TEXT PRIMARY KEY,
                 subject    TEXT NOT NULL,
                 data       TEXT NOT NULL,
                 timestamp  TEXT NOT NULL,
                 source     TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_events_subject ON events(subject);
             CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
        )
        .context("initializing event store schema")?;

        info!(path = %path.as_ref().display(), "event store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            retention: chrono::Duration::days(retention_days),
        })
    }

    fn row_to_event(
        event_id: String,
        subject: String,
        data: String,
        timestamp: String,
        source: Option<String>,
    ) -> Result<Event> {
        let data = serde_json::from_str(&data).context("decoding stored event payload")?;
        let timestamp: DateTime<Utc> = timestamp.parse().context("decoding stored event timestamp")?;
        Ok(Event {
            event_id,
            subject,
            data,
            timestamp,
            source,
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert(&self, event: &Event) -> Result<()> {
        let event = event.clone();
        let conn = self.conn.lock().await;
        let data = serde_json::to_string(&event.data)?;
        conn.execute(
            "INSERT OR REPLACE INTO events (event_id, subject, data, timestamp, source)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.event_id,
                event.subject,
                data,
                event.timestamp.to_rfc3339(),
                event.source,
            ],
        )
        .context("inserting event")?;
        Ok(())
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT event_id, subject, data, timestamp, source
             FROM events ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (event_id, subject, data, timestamp, source) = row?;
            out.push(Self::row_to_event(event_id, subject, data, timestamp, source)?);
        }
        Ok(out)
    }

    async fn query_by_subject(&self, subject: &str, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT event_id, subject, data, timestamp, source
             FROM events WHERE subject = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![subject, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (event_id, subject, data, timestamp, source) = row?;
            out.push(Self::row_to_event(event_id, subject, data, timestamp, source)?);
        }
        Ok(out)
    }

    async fn cleanup(&self) -> Result<()> {
        let cutoff = (Utc::now() - self.retention).to_rfc3339();
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])?;
        debug!(deleted, cutoff = %cutoff, "event store cleanup");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // rusqlite::Connection closes on drop; nothing to flush explicitly
        // beyond letting WAL checkpoints happen naturally.
        Ok(())
    }
}

/// Bounded in-memory ring buffer, used for tests and for short-lived runs
/// where durability across restarts is not required.
pub struct InMemoryEventStore {
    events: SyncMutex<VecDeque<Event>>,
    capacity: usize,
}

impl InMemoryEventStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: SyncMutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: &Event) -> Result<()> {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }

    async fn query_recent(&self, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.lock();
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    async fn query_by_subject(&self, subject: &str, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.lock();
        Ok(events
            .iter()
            .rev()
            .filter(|e| e.subject == subject)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[tokio::test]
    async fn in_memory_store_evicts_oldest_beyond_capacity() {
        let store = InMemoryEventStore::new(2);
        store.insert(&Event::new("a", Map::new())).await.unwrap();
        store.insert(&Event::new("b", Map::new())).await.unwrap();
        store.insert(&Event::new("c", Map::new())).await.unwrap();

        let recent = store.query_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].subject, "c");
        assert_eq!(recent[1].subject, "b");
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_events() {
        let dir = tempdir();
        let store = SqliteEventStore::open(dir.join("events.db"), 7).unwrap();

        let event = Event::new("order.created", Map::new());
        store.insert(&event).await.unwrap();

        let recent = store.query_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].event_id, event.event_id);

        let by_subject = store.query_by_subject("order.created", 10).await.unwrap();
        assert_eq!(by_subject.len(), 1);

        let none = store.query_by_subject("order.filled", 10).await.unwrap();
        assert!(none.is_empty());
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "nexus-perp-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
