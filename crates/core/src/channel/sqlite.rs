//! SQLite-backed durable request channel.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tokio::sync::Notify;
use tracing::debug;

use super::{encode_request, Acker, ChannelError, Delivery, DeliveryTag, RequestChannel};
use crate::booking::BookingRequest;

/// Tuning for the durable queue.
#[derive(Debug, Clone, Copy)]
pub struct SqliteChannelOptions {
    /// How often to look for newly visible messages when idle.
    pub poll_interval: Duration,
    /// How long a delivered message stays invisible before it is handed out
    /// again if the worker never settles it.
    pub lease: Duration,
    /// How long to wait on a locked database.
    pub busy_timeout: Duration,
}

impl Default for SqliteChannelOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            lease: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

fn db_err(e: rusqlite::Error) -> ChannelError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            ChannelError::Unavailable(format!("queue locked: {}", e))
        }
        _ => ChannelError::Unavailable(e.to_string()),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

struct Shared {
    conn: Mutex<Connection>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ChannelError> {
        self.conn
            .lock()
            .map_err(|_| ChannelError::Unavailable("connection lock poisoned".to_string()))
    }
}

impl Acker for Shared {
    fn ack(&self, tag: &DeliveryTag) -> Result<(), ChannelError> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                "DELETE FROM booking_queue WHERE id = ? AND lease_token = ?",
                params![tag.message_id, tag.lease],
            )
            .map_err(db_err)?;
        if deleted == 0 {
            // The lease expired and another consumer holds the message now.
            debug!("Ignoring ack for stale delivery {}", tag);
        }
        Ok(())
    }

    fn nack(&self, tag: &DeliveryTag, delay: Duration) -> Result<(), ChannelError> {
        let updated = {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE booking_queue SET visible_at = ?, lease_token = NULL WHERE id = ? AND lease_token = ?",
                params![now_millis() + millis(delay), tag.message_id, tag.lease],
            )
            .map_err(db_err)?
        };
        if updated == 0 {
            debug!("Ignoring nack for stale delivery {}", tag);
        } else if delay.is_zero() {
            self.notify.notify_waiters();
        }
        Ok(())
    }
}

/// Durable at-least-once queue stored in a SQLite table.
///
/// A delivered message is leased rather than removed: it stays in the table,
/// invisible until `visible_at`, and is only deleted by an ack carrying the
/// current lease token. If a worker dies mid-flight the lease simply runs out
/// and the message is handed out again.
pub struct SqliteRequestChannel {
    shared: Arc<Shared>,
    options: SqliteChannelOptions,
    closed: AtomicBool,
}

impl SqliteRequestChannel {
    /// Open (or create) the queue table in the database at `path`.
    pub fn new(path: &Path, options: SqliteChannelOptions) -> Result<Self, ChannelError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        Self::from_connection(conn, options)
    }

    /// Create an in-memory queue (useful for testing).
    pub fn in_memory(options: SqliteChannelOptions) -> Result<Self, ChannelError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn, options)
    }

    fn from_connection(
        conn: Connection,
        options: SqliteChannelOptions,
    ) -> Result<Self, ChannelError> {
        conn.busy_timeout(options.busy_timeout).map_err(db_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS booking_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL,
                body BLOB NOT NULL,
                enqueued_at TEXT NOT NULL,
                visible_at INTEGER NOT NULL,
                lease_token TEXT,
                delivery_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_booking_queue_visible ON booking_queue(visible_at, id);
            CREATE INDEX IF NOT EXISTS idx_booking_queue_event_id ON booking_queue(event_id);
            "#,
        )
        .map_err(db_err)?;

        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                notify: Notify::new(),
            }),
            options,
            closed: AtomicBool::new(false),
        })
    }

    /// Stop handing out messages. Queued messages stay in the table.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    /// Lease the oldest visible message, if any.
    fn claim(&self) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.shared.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let now = now_millis();
        let row: Option<(i64, Vec<u8>, u32)> = tx
            .query_row(
                "SELECT id, body, delivery_count FROM booking_queue WHERE visible_at <= ? ORDER BY visible_at ASC, id ASC LIMIT 1",
                params![now],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;

        let Some((id, body, delivery_count)) = row else {
            return Ok(None);
        };

        let lease = uuid::Uuid::new_v4().to_string();
        let delivery_count = delivery_count + 1;
        tx.execute(
            "UPDATE booking_queue SET visible_at = ?, lease_token = ?, delivery_count = ? WHERE id = ?",
            params![now + millis(self.options.lease), lease, delivery_count, id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(Some(Delivery::new(
            DeliveryTag {
                message_id: id,
                lease,
            },
            body,
            delivery_count,
            Arc::clone(&self.shared) as Arc<dyn Acker>,
        )))
    }
}

#[async_trait]
impl RequestChannel for SqliteRequestChannel {
    async fn publish(&self, request: &BookingRequest) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        let body = encode_request(request)?;
        {
            let conn = self.shared.lock()?;
            let now = Utc::now();
            conn.execute(
                "INSERT INTO booking_queue (event_id, body, enqueued_at, visible_at) VALUES (?, ?, ?, ?)",
                params![
                    request.event_id,
                    body,
                    now.to_rfc3339(),
                    now.timestamp_millis()
                ],
            )
            .map_err(db_err)?;
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, ChannelError> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            if let Some(delivery) = self.claim()? {
                return Ok(Some(delivery));
            }

            // Other processes, expired leases and delayed retries are only
            // noticed by polling.
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.options.poll_interval) => {}
            }
        }
    }

    async fn pending_count(&self, event_id: &str) -> Result<u64, ChannelError> {
        let conn = self.shared.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM booking_queue WHERE event_id = ?",
                params![event_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count.max(0) as u64)
    }
}
