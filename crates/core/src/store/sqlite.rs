//! SQLite-backed store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::traits::remaining;
use super::{CapacityStore, EventRegistry, ReservationLedger, ReserveOutcome, StoreError};
use crate::booking::{CreateEventRequest, Event, Rejection, Reservation, UpdateEventRequest};

/// Default time to wait on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed events, capacity and reservation ledger.
///
/// Every reservation runs inside an immediate transaction, which takes the
/// database write lock before the sold quantity is read. The check and the
/// insert therefore land as one step.
///
/// SQLite has a single writer, so reservations for different events are
/// serialized too: first by the connection mutex, then by the database lock
/// across connections. Use [`MemoryStore`](super::MemoryStore) when events
/// must not contend.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StoreError::Unavailable(format!("database locked: {}", e))
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..) => StoreError::Corrupt(e.to_string()),
        _ => StoreError::Unavailable(e.to_string()),
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        Self::from_connection(conn, busy_timeout)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout).map_err(db_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL,
                capacity INTEGER NOT NULL CHECK (capacity >= 0),
                owner TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS reservations (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL REFERENCES events(id),
                email TEXT NOT NULL,
                quantity INTEGER NOT NULL CHECK (quantity > 0),
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reservations_event_id ON reservations(event_id);

            CREATE TABLE IF NOT EXISTS rejections (
                reservation_id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        let created_at: String = row.get(5)?;
        Ok(Event {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            capacity: row.get(3)?,
            owner: row.get(4)?,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_reservation(row: &rusqlite::Row) -> rusqlite::Result<Reservation> {
        let created_at: String = row.get(4)?;
        Ok(Reservation {
            id: row.get(0)?,
            event_id: row.get(1)?,
            email: row.get(2)?,
            quantity: row.get(3)?,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_rejection(row: &rusqlite::Row) -> rusqlite::Result<Rejection> {
        let created_at: String = row.get(4)?;
        Ok(Rejection {
            reservation_id: row.get(0)?,
            event_id: row.get(1)?,
            reason: row.get(2)?,
            detail: row.get(3)?,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn capacity_of(conn: &Connection, event_id: &str) -> Result<Option<u32>, StoreError> {
        conn.query_row(
            "SELECT capacity FROM events WHERE id = ?",
            params![event_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn sold_of(conn: &Connection, event_id: &str) -> Result<u32, StoreError> {
        let sold: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(quantity), 0) FROM reservations WHERE event_id = ?",
                params![event_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        u32::try_from(sold)
            .map_err(|_| StoreError::Corrupt(format!("sold quantity {} out of range", sold)))
    }

    fn reservation_exists(conn: &Connection, reservation_id: &str) -> Result<bool, StoreError> {
        conn.query_row(
            "SELECT 1 FROM reservations WHERE id = ?",
            params![reservation_id],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(db_err)
    }

    fn insert_row(conn: &Connection, reservation: &Reservation) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO reservations (id, event_id, email, quantity, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                reservation.id,
                reservation.event_id,
                reservation.email,
                reservation.quantity,
                reservation.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

impl CapacityStore for SqliteStore {
    fn get_capacity(&self, event_id: &str) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Self::capacity_of(&conn, event_id)
    }

    fn sold_quantity(&self, event_id: &str) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        Self::sold_of(&conn, event_id)
    }

    fn try_reserve(&self, reservation: &Reservation) -> Result<ReserveOutcome, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let capacity = Self::capacity_of(&tx, &reservation.event_id)?
            .ok_or_else(|| StoreError::EventNotFound(reservation.event_id.clone()))?;

        if Self::reservation_exists(&tx, &reservation.id)? {
            return Err(StoreError::DuplicateReservation(reservation.id.clone()));
        }

        let sold = Self::sold_of(&tx, &reservation.event_id)?;
        let left = remaining(capacity, sold);
        if reservation.quantity > left {
            // Dropping the transaction rolls it back.
            return Ok(ReserveOutcome::Denied { remaining: left });
        }

        Self::insert_row(&tx, reservation)?;
        tx.commit().map_err(db_err)?;

        Ok(ReserveOutcome::Granted {
            remaining: left - reservation.quantity,
        })
    }
}

impl ReservationLedger for SqliteStore {
    fn get(&self, reservation_id: &str) -> Result<Option<Reservation>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, event_id, email, quantity, created_at FROM reservations WHERE id = ?",
            params![reservation_id],
            Self::row_to_reservation,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_for_event(&self, event_id: &str) -> Result<Vec<Reservation>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, event_id, email, quantity, created_at FROM reservations WHERE event_id = ? ORDER BY created_at ASC, id ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![event_id], Self::row_to_reservation)
            .map_err(db_err)?;

        let mut reservations = Vec::new();
        for row in rows {
            reservations.push(row.map_err(db_err)?);
        }
        Ok(reservations)
    }

    fn record_rejection(&self, rejection: &Rejection) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO rejections (reservation_id, event_id, reason, detail, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(reservation_id) DO UPDATE SET
                event_id = excluded.event_id,
                reason = excluded.reason,
                detail = excluded.detail,
                created_at = excluded.created_at
            "#,
            params![
                rejection.reservation_id,
                rejection.event_id,
                rejection.reason,
                rejection.detail,
                rejection.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn get_rejection(&self, reservation_id: &str) -> Result<Option<Rejection>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT reservation_id, event_id, reason, detail, created_at FROM rejections WHERE reservation_id = ?",
            params![reservation_id],
            Self::row_to_rejection,
        )
        .optional()
        .map_err(db_err)
    }
}

impl EventRegistry for SqliteStore {
    fn create_event(&self, request: CreateEventRequest) -> Result<Event, StoreError> {
        let conn = self.lock()?;
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            capacity: request.capacity,
            owner: request.owner,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO events (id, name, description, capacity, owner, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                event.id,
                event.name,
                event.description,
                event.capacity,
                event.owner,
                event.created_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(event)
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, description, capacity, owner, created_at FROM events WHERE id = ?",
            params![event_id],
            Self::row_to_event,
        )
        .optional()
        .map_err(db_err)
    }

    fn update_event(
        &self,
        event_id: &str,
        request: UpdateEventRequest,
    ) -> Result<Event, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let mut event = tx
            .query_row(
                "SELECT id, name, description, capacity, owner, created_at FROM events WHERE id = ?",
                params![event_id],
                Self::row_to_event,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?;

        let sold = Self::sold_of(&tx, event_id)?;
        if request.capacity < sold {
            return Err(StoreError::CapacityBelowSold {
                event_id: event_id.to_string(),
                capacity: request.capacity,
                sold,
            });
        }

        tx.execute(
            "UPDATE events SET name = ?, description = ?, capacity = ? WHERE id = ?",
            params![request.name, request.description, request.capacity, event_id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        event.name = request.name;
        event.description = request.description;
        event.capacity = request.capacity;
        Ok(event)
    }

    fn delete_event(&self, event_id: &str) -> Result<Event, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let event = tx
            .query_row(
                "SELECT id, name, description, capacity, owner, created_at FROM events WHERE id = ?",
                params![event_id],
                Self::row_to_event,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?;

        let reservations: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM reservations WHERE event_id = ?",
                params![event_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if reservations > 0 {
            return Err(StoreError::EventInUse {
                event_id: event_id.to_string(),
                reservations: reservations as u64,
            });
        }

        tx.execute("DELETE FROM events WHERE id = ?", params![event_id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        Ok(event)
    }
}
