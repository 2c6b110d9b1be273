//! Store wrapper with controllable failures.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::booking::{CreateEventRequest, Event, Rejection, Reservation, UpdateEventRequest};
use crate::store::{
    CapacityStore, EventRegistry, MemoryStore, ReservationLedger, ReserveOutcome, StoreError,
};

use super::fixtures;

/// A [`MemoryStore`] that can be told to fail.
///
/// Provides controllable behavior for testing:
/// - Count capacity and ledger calls
/// - Fail the next N calls with `StoreError::Unavailable`
/// - Fail every `try_reserve`, `sold_quantity` or `record_rejection` until
///   switched off
///
/// Event registry calls are passed through and neither counted nor failed.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    calls: AtomicUsize,
    fail_next: AtomicU32,
    fail_reserves: AtomicBool,
    fail_sold_quantity: AtomicBool,
    fail_rejections: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one event with the given capacity.
    pub fn with_event(capacity: u32) -> (Self, String) {
        let store = Self::new();
        let event_id = match store
            .inner
            .create_event(fixtures::event_request("Flaky", capacity))
        {
            Ok(event) => event.id,
            Err(e) => panic!("in-memory event creation failed: {}", e),
        };
        (store, event_id)
    }

    /// The wrapped store, for asserting on state without going through the
    /// failure switches.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Number of capacity and ledger calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make every `try_reserve` fail while `enabled`.
    pub fn fail_reserves(&self, enabled: bool) {
        self.fail_reserves.store(enabled, Ordering::SeqCst);
    }

    /// Make every `sold_quantity` fail while `enabled`.
    pub fn fail_sold_quantity(&self, enabled: bool) {
        self.fail_sold_quantity.store(enabled, Ordering::SeqCst);
    }

    /// Make every `record_rejection` fail while `enabled`.
    pub fn fail_rejections(&self, enabled: bool) {
        self.fail_rejections.store(enabled, Ordering::SeqCst);
    }

    fn enter(&self, operation: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable(format!(
                "injected failure in {}",
                operation
            )));
        }
        Ok(())
    }
}

impl CapacityStore for FlakyStore {
    fn get_capacity(&self, event_id: &str) -> Result<Option<u32>, StoreError> {
        self.enter("get_capacity")?;
        self.inner.get_capacity(event_id)
    }

    fn sold_quantity(&self, event_id: &str) -> Result<u32, StoreError> {
        self.enter("sold_quantity")?;
        if self.fail_sold_quantity.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected failure in sold_quantity".to_string(),
            ));
        }
        self.inner.sold_quantity(event_id)
    }

    fn try_reserve(&self, reservation: &Reservation) -> Result<ReserveOutcome, StoreError> {
        self.enter("try_reserve")?;
        if self.fail_reserves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected failure in try_reserve".to_string(),
            ));
        }
        self.inner.try_reserve(reservation)
    }
}

impl ReservationLedger for FlakyStore {
    fn get(&self, reservation_id: &str) -> Result<Option<Reservation>, StoreError> {
        self.enter("get")?;
        self.inner.get(reservation_id)
    }

    fn list_for_event(&self, event_id: &str) -> Result<Vec<Reservation>, StoreError> {
        self.enter("list_for_event")?;
        self.inner.list_for_event(event_id)
    }

    fn record_rejection(&self, rejection: &Rejection) -> Result<(), StoreError> {
        self.enter("record_rejection")?;
        if self.fail_rejections.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected failure in record_rejection".to_string(),
            ));
        }
        self.inner.record_rejection(rejection)
    }

    fn get_rejection(&self, reservation_id: &str) -> Result<Option<Rejection>, StoreError> {
        self.enter("get_rejection")?;
        self.inner.get_rejection(reservation_id)
    }
}

impl EventRegistry for FlakyStore {
    fn create_event(&self, request: CreateEventRequest) -> Result<Event, StoreError> {
        self.inner.create_event(request)
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        self.inner.get_event(event_id)
    }

    fn update_event(
        &self,
        event_id: &str,
        request: UpdateEventRequest,
    ) -> Result<Event, StoreError> {
        self.inner.update_event(event_id, request)
    }

    fn delete_event(&self, event_id: &str) -> Result<Event, StoreError> {
        self.inner.delete_event(event_id)
    }
}
