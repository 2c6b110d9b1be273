//! In-memory store with per-event locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;

use super::traits::remaining;
use super::{CapacityStore, EventRegistry, ReservationLedger, ReserveOutcome, StoreError};
use crate::booking::{CreateEventRequest, Event, Rejection, Reservation, UpdateEventRequest};

struct EventSlot {
    event: Event,
    sold: u32,
    deleted: bool,
}

/// In-memory store.
///
/// Every event owns its own lock, so reservations for one event never wait on
/// another. The reservation index is only write-locked for the final insert.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Arc<Mutex<EventSlot>>>>,
    reservations: RwLock<HashMap<String, Reservation>>,
    rejections: RwLock<HashMap<String, Rejection>>,
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event with a caller-chosen id, replacing any existing one.
    pub fn put_event(&self, event: Event) -> Result<(), StoreError> {
        let mut events = self.events.write().map_err(poisoned)?;
        events.insert(
            event.id.clone(),
            Arc::new(Mutex::new(EventSlot {
                event,
                sold: 0,
                deleted: false,
            })),
        );
        Ok(())
    }

    fn slot(&self, event_id: &str) -> Result<Option<Arc<Mutex<EventSlot>>>, StoreError> {
        let events = self.events.read().map_err(poisoned)?;
        Ok(events.get(event_id).cloned())
    }

    fn lock_slot(slot: &Mutex<EventSlot>) -> Result<MutexGuard<'_, EventSlot>, StoreError> {
        slot.lock().map_err(poisoned)
    }
}

impl CapacityStore for MemoryStore {
    fn get_capacity(&self, event_id: &str) -> Result<Option<u32>, StoreError> {
        let Some(slot) = self.slot(event_id)? else {
            return Ok(None);
        };
        let slot = Self::lock_slot(&slot)?;
        Ok((!slot.deleted).then_some(slot.event.capacity))
    }

    fn sold_quantity(&self, event_id: &str) -> Result<u32, StoreError> {
        let Some(slot) = self.slot(event_id)? else {
            return Ok(0);
        };
        let slot = Self::lock_slot(&slot)?;
        Ok(slot.sold)
    }

    fn try_reserve(&self, reservation: &Reservation) -> Result<ReserveOutcome, StoreError> {
        let slot = self
            .slot(&reservation.event_id)?
            .ok_or_else(|| StoreError::EventNotFound(reservation.event_id.clone()))?;
        let mut slot = Self::lock_slot(&slot)?;
        if slot.deleted {
            return Err(StoreError::EventNotFound(reservation.event_id.clone()));
        }

        if self
            .reservations
            .read()
            .map_err(poisoned)?
            .contains_key(&reservation.id)
        {
            return Err(StoreError::DuplicateReservation(reservation.id.clone()));
        }

        let left = remaining(slot.event.capacity, slot.sold);
        if reservation.quantity > left {
            return Ok(ReserveOutcome::Denied { remaining: left });
        }

        // A concurrent request for another event may have claimed the same id
        // since the read above, so check again under the write lock.
        let mut reservations = self.reservations.write().map_err(poisoned)?;
        if reservations.contains_key(&reservation.id) {
            return Err(StoreError::DuplicateReservation(reservation.id.clone()));
        }
        reservations.insert(reservation.id.clone(), reservation.clone());
        slot.sold += reservation.quantity;

        Ok(ReserveOutcome::Granted {
            remaining: remaining(slot.event.capacity, slot.sold),
        })
    }
}

impl ReservationLedger for MemoryStore {
    fn get(&self, reservation_id: &str) -> Result<Option<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(poisoned)?;
        Ok(reservations.get(reservation_id).cloned())
    }

    fn list_for_event(&self, event_id: &str) -> Result<Vec<Reservation>, StoreError> {
        let reservations = self.reservations.read().map_err(poisoned)?;
        let mut list: Vec<Reservation> = reservations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    fn record_rejection(&self, rejection: &Rejection) -> Result<(), StoreError> {
        let mut rejections = self.rejections.write().map_err(poisoned)?;
        rejections.insert(rejection.reservation_id.clone(), rejection.clone());
        Ok(())
    }

    fn get_rejection(&self, reservation_id: &str) -> Result<Option<Rejection>, StoreError> {
        let rejections = self.rejections.read().map_err(poisoned)?;
        Ok(rejections.get(reservation_id).cloned())
    }
}

impl EventRegistry for MemoryStore {
    fn create_event(&self, request: CreateEventRequest) -> Result<Event, StoreError> {
        let event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            capacity: request.capacity,
            owner: request.owner,
            created_at: Utc::now(),
        };
        self.put_event(event.clone())?;
        Ok(event)
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let Some(slot) = self.slot(event_id)? else {
            return Ok(None);
        };
        let slot = Self::lock_slot(&slot)?;
        Ok((!slot.deleted).then(|| slot.event.clone()))
    }

    fn update_event(
        &self,
        event_id: &str,
        request: UpdateEventRequest,
    ) -> Result<Event, StoreError> {
        let slot = self
            .slot(event_id)?
            .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?;
        let mut slot = Self::lock_slot(&slot)?;
        if slot.deleted {
            return Err(StoreError::EventNotFound(event_id.to_string()));
        }
        if request.capacity < slot.sold {
            return Err(StoreError::CapacityBelowSold {
                event_id: event_id.to_string(),
                capacity: request.capacity,
                sold: slot.sold,
            });
        }

        slot.event.name = request.name;
        slot.event.description = request.description;
        slot.event.capacity = request.capacity;
        Ok(slot.event.clone())
    }

    fn delete_event(&self, event_id: &str) -> Result<Event, StoreError> {
        let mut events = self.events.write().map_err(poisoned)?;
        let slot = events
            .get(event_id)
            .cloned()
            .ok_or_else(|| StoreError::EventNotFound(event_id.to_string()))?;
        let mut slot = Self::lock_slot(&slot)?;

        let count = self
            .reservations
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|r| r.event_id == event_id)
            .count() as u64;
        if count > 0 {
            return Err(StoreError::EventInUse {
                event_id: event_id.to_string(),
                reservations: count,
            });
        }

        slot.deleted = true;
        events.remove(event_id);
        Ok(slot.event.clone())
    }
}
