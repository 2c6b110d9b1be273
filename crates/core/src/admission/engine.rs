//! The admission engine: turns a booking request into a terminal decision.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{AdmissionError, AdmissionOutcome, RejectionReason};
use crate::booking::{BookingRequest, Rejection};
use crate::metrics;
use crate::store::{CapacityStore, ReservationLedger, ReserveOutcome, StoreError};

/// Decides whether booking requests are admitted.
///
/// All capacity serialization is delegated to the [`CapacityStore`]; the engine
/// itself holds no locks and can be shared freely between workers.
#[derive(Clone)]
pub struct AdmissionEngine {
    capacity: Arc<dyn CapacityStore>,
    ledger: Arc<dyn ReservationLedger>,
}

impl AdmissionEngine {
    pub fn new(capacity: Arc<dyn CapacityStore>, ledger: Arc<dyn ReservationLedger>) -> Self {
        Self { capacity, ledger }
    }

    /// Build an engine over a store that implements both halves.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CapacityStore + ReservationLedger + 'static,
    {
        Self {
            capacity: Arc::clone(&store) as Arc<dyn CapacityStore>,
            ledger: store as Arc<dyn ReservationLedger>,
        }
    }

    /// Admit a booking request.
    ///
    /// Business rejections are returned as `Ok`; only transient store failures
    /// come back as `Err` and should be retried by redelivering the request.
    pub fn admit(&self, request: &BookingRequest) -> Result<AdmissionOutcome, AdmissionError> {
        let started = Instant::now();
        let result = self.decide(request);

        let label = match &result {
            Ok(outcome) => outcome.state().as_str(),
            Err(e) => e.state().as_str(),
        };
        metrics::ADMISSIONS.with_label_values(&[label]).inc();
        metrics::ADMISSION_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());

        result
    }

    /// Persist a rejection so the request's status can be looked up.
    ///
    /// Admissions need nothing here since the reservation is the record.
    /// Requests without a ticket id cannot be looked up and are skipped.
    pub fn record(
        &self,
        request: &BookingRequest,
        outcome: &AdmissionOutcome,
    ) -> Result<(), AdmissionError> {
        let AdmissionOutcome::Rejected(reason) = outcome else {
            return Ok(());
        };
        if request.reservation_id.trim().is_empty() {
            return Ok(());
        }

        let rejection = Rejection {
            reservation_id: request.reservation_id.clone(),
            event_id: request.event_id.clone(),
            reason: reason.code().to_string(),
            detail: reason.detail(),
            created_at: Utc::now(),
        };
        self.ledger.record_rejection(&rejection).map_err(retryable)
    }

    fn decide(&self, request: &BookingRequest) -> Result<AdmissionOutcome, AdmissionError> {
        let quantity = match request.validate() {
            Ok(quantity) => quantity,
            Err(detail) => {
                warn!(
                    ticket_id = %request.reservation_id,
                    event_id = %request.event_id,
                    "Dropping malformed booking request: {}",
                    detail
                );
                return Ok(AdmissionOutcome::malformed(detail));
            }
        };

        if self
            .ledger
            .get(&request.reservation_id)
            .map_err(retryable)?
            .is_some()
        {
            debug!(ticket_id = %request.reservation_id, "Ticket already admitted");
            return Ok(already_admitted(request));
        }

        if self
            .capacity
            .get_capacity(&request.event_id)
            .map_err(retryable)?
            .is_none()
        {
            info!(
                ticket_id = %request.reservation_id,
                event_id = %request.event_id,
                "Rejecting booking for unknown event"
            );
            return Ok(not_found(request));
        }

        let reservation = request.to_reservation(quantity);
        match self.capacity.try_reserve(&reservation) {
            Ok(ReserveOutcome::Granted { remaining }) => {
                metrics::TICKETS_RESERVED.inc_by(u64::from(quantity));
                info!(
                    ticket_id = %request.reservation_id,
                    event_id = %request.event_id,
                    quantity,
                    remaining,
                    "Ticket booked"
                );
                Ok(AdmissionOutcome::Admitted {
                    reservation_id: request.reservation_id.clone(),
                    remaining,
                })
            }
            Ok(ReserveOutcome::Denied { remaining }) => {
                info!(
                    ticket_id = %request.reservation_id,
                    event_id = %request.event_id,
                    quantity,
                    remaining,
                    "Insufficient capacity"
                );
                Ok(AdmissionOutcome::Rejected(
                    RejectionReason::InsufficientCapacity {
                        requested: quantity,
                        remaining,
                    },
                ))
            }
            // A redelivered copy of this request won the race since the
            // ledger lookup above.
            Err(StoreError::DuplicateReservation(_)) => Ok(already_admitted(request)),
            Err(StoreError::EventNotFound(_)) => Ok(not_found(request)),
            Err(e) => Err(retryable(e)),
        }
    }
}

fn retryable(e: StoreError) -> AdmissionError {
    warn!("Store failure during admission: {}", e);
    AdmissionError::Retryable(e)
}

fn already_admitted(request: &BookingRequest) -> AdmissionOutcome {
    AdmissionOutcome::AlreadyAdmitted {
        reservation_id: request.reservation_id.clone(),
    }
}

fn not_found(request: &BookingRequest) -> AdmissionOutcome {
    AdmissionOutcome::Rejected(RejectionReason::ResourceNotFound {
        event_id: request.event_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionState;
    use crate::store::{EventRegistry, MemoryStore, SqliteStore};
    use crate::testing::{fixtures, FlakyStore};

    fn engine_with_event(capacity: u32) -> (AdmissionEngine, Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let event = store
            .create_event(fixtures::event_request("Concert", capacity))
            .unwrap();
        (AdmissionEngine::from_store(Arc::clone(&store)), store, event.id)
    }

    #[test]
    fn test_admit_within_capacity() {
        let (engine, store, event_id) = engine_with_event(5);
        store
            .try_reserve(&fixtures::reservation("seed", &event_id, 3))
            .unwrap();

        let outcome = engine
            .admit(&fixtures::booking("t-1", &event_id, 2))
            .unwrap();

        assert_eq!(
            outcome,
            AdmissionOutcome::Admitted {
                reservation_id: "t-1".to_string(),
                remaining: 0,
            }
        );
        assert_eq!(store.sold_quantity(&event_id).unwrap(), 5);
    }

    #[test]
    fn test_reject_when_sold_out() {
        let (engine, store, event_id) = engine_with_event(5);
        store
            .try_reserve(&fixtures::reservation("seed", &event_id, 5))
            .unwrap();

        for quantity in 1..=3 {
            let outcome = engine
                .admit(&fixtures::booking(&format!("t-{}", quantity), &event_id, quantity))
                .unwrap();
            assert_eq!(
                outcome,
                AdmissionOutcome::Rejected(RejectionReason::InsufficientCapacity {
                    requested: quantity as u32,
                    remaining: 0,
                })
            );
        }
        assert_eq!(store.sold_quantity(&event_id).unwrap(), 5);
    }

    #[test]
    fn test_sequential_requests_fill_capacity() {
        let (engine, _store, event_id) = engine_with_event(3);

        let states: Vec<AdmissionState> = (0..4)
            .map(|i| {
                engine
                    .admit(&fixtures::booking(&format!("t-{}", i), &event_id, 1))
                    .unwrap()
                    .state()
            })
            .collect();

        assert_eq!(
            states,
            vec![
                AdmissionState::Admitted,
                AdmissionState::Admitted,
                AdmissionState::Admitted,
                AdmissionState::RejectedInsufficientCapacity,
            ]
        );
    }

    #[test]
    fn test_admit_twice_is_idempotent() {
        let (engine, store, event_id) = engine_with_event(10);
        let request = fixtures::booking("t-1", &event_id, 4);

        assert!(engine.admit(&request).unwrap().is_admitted());
        let again = engine.admit(&request).unwrap();

        assert_eq!(
            again,
            AdmissionOutcome::AlreadyAdmitted {
                reservation_id: "t-1".to_string()
            }
        );
        assert_eq!(store.sold_quantity(&event_id).unwrap(), 4);
        assert_eq!(store.list_for_event(&event_id).unwrap().len(), 1);
    }

    #[test]
    fn test_same_id_different_payload_is_already_admitted() {
        let (engine, store, event_id) = engine_with_event(10);
        engine
            .admit(&fixtures::booking("t-1", &event_id, 2))
            .unwrap();

        let mut changed = fixtures::booking("t-1", &event_id, 7);
        changed.email = "someone-else@example.com".to_string();
        let outcome = engine.admit(&changed).unwrap();

        assert_eq!(outcome.state(), AdmissionState::AlreadyAdmitted);
        let stored = store.get("t-1").unwrap().unwrap();
        assert_eq!(stored.quantity, 2);
        assert_eq!(store.sold_quantity(&event_id).unwrap(), 2);
    }

    #[test]
    fn test_unknown_event_rejected() {
        let (engine, _store, _) = engine_with_event(10);
        let outcome = engine
            .admit(&fixtures::booking("t-1", "no-such-event", 1))
            .unwrap();
        assert_eq!(outcome.state(), AdmissionState::RejectedNotFound);
    }

    #[test]
    fn test_malformed_never_touches_store() {
        let (flaky, inner_event) = FlakyStore::with_event(10);
        let flaky = Arc::new(flaky);
        let engine = AdmissionEngine::from_store(Arc::clone(&flaky));

        for request in [
            fixtures::booking("t-1", &inner_event, 0),
            fixtures::booking("t-2", &inner_event, -4),
            fixtures::booking("t-3", "", 1),
        ] {
            let outcome = engine.admit(&request).unwrap();
            assert_eq!(outcome.state(), AdmissionState::RejectedMalformed);
        }
        assert_eq!(flaky.calls(), 0);
    }

    #[test]
    fn test_store_failure_is_retryable_not_rejection() {
        let (flaky, event_id) = FlakyStore::with_event(10);
        let flaky = Arc::new(flaky);
        let engine = AdmissionEngine::from_store(Arc::clone(&flaky));

        flaky.fail_next(1);
        let result = engine.admit(&fixtures::booking("t-1", &event_id, 1));
        assert!(matches!(result, Err(AdmissionError::Retryable(_))));

        let outcome = engine
            .admit(&fixtures::booking("t-1", &event_id, 1))
            .unwrap();
        assert!(outcome.is_admitted());
    }

    #[test]
    fn test_failure_during_reserve_leaves_no_reservation() {
        let (flaky, event_id) = FlakyStore::with_event(10);
        let flaky = Arc::new(flaky);
        let engine = AdmissionEngine::from_store(Arc::clone(&flaky));

        flaky.fail_reserves(true);
        assert!(engine
            .admit(&fixtures::booking("t-1", &event_id, 1))
            .is_err());
        assert!(flaky.inner().get("t-1").unwrap().is_none());
        assert_eq!(flaky.inner().sold_quantity(&event_id).unwrap(), 0);
    }

    #[test]
    fn test_record_keeps_rejection_reason() {
        let (engine, store, event_id) = engine_with_event(2);
        let request = fixtures::booking("t-1", &event_id, 5);

        let outcome = engine.admit(&request).unwrap();
        engine.record(&request, &outcome).unwrap();

        let rejection = store.get_rejection("t-1").unwrap().unwrap();
        assert_eq!(rejection.reason, "insufficient_capacity");
        assert_eq!(rejection.event_id, event_id);
        assert!(rejection.detail.contains("only 2 remaining"));
    }

    #[test]
    fn test_record_ignores_admissions_and_anonymous_requests() {
        let (engine, store, event_id) = engine_with_event(2);
        let request = fixtures::booking("t-1", &event_id, 1);
        let outcome = engine.admit(&request).unwrap();
        engine.record(&request, &outcome).unwrap();
        assert!(store.get_rejection("t-1").unwrap().is_none());

        let anonymous = fixtures::booking("", &event_id, 1);
        let outcome = engine.admit(&anonymous).unwrap();
        assert!(outcome.is_rejected());
        engine.record(&anonymous, &outcome).unwrap();
        assert!(store.get_rejection("").unwrap().is_none());
    }

    #[test]
    fn test_record_failure_is_retryable() {
        let (flaky, _) = FlakyStore::with_event(1);
        let flaky = Arc::new(flaky);
        let engine = AdmissionEngine::from_store(Arc::clone(&flaky));
        let request = fixtures::booking("t-1", "missing", 1);

        let outcome = engine.admit(&request).unwrap();
        flaky.fail_next(1);
        assert!(matches!(
            engine.record(&request, &outcome),
            Err(AdmissionError::Retryable(_))
        ));
        assert!(flaky.inner().get_rejection("t-1").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_requests_exactly_one_wins() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let event = store
            .create_event(fixtures::event_request("Concert", 10))
            .unwrap();
        let engine = AdmissionEngine::from_store(Arc::clone(&store));

        let outcomes: Vec<AdmissionOutcome> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["t-a", "t-b"]
                .into_iter()
                .map(|id| {
                    let engine = engine.clone();
                    let event_id = event.id.clone();
                    scope.spawn(move || engine.admit(&fixtures::booking(id, &event_id, 6)).unwrap())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let admitted = outcomes.iter().filter(|o| o.is_admitted()).count();
        let rejected = outcomes
            .iter()
            .filter(|o| o.state() == AdmissionState::RejectedInsufficientCapacity)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(rejected, 1);
        assert_eq!(store.sold_quantity(&event.id).unwrap(), 6);
    }
}
