use std::sync::Arc;
use turnstile_core::{
    BookingProducer, CapacityStore, Config, EventRegistry, RequestChannel, ReservationLedger,
    WorkerPool,
};

/// Shared application state
pub struct AppState {
    config: Config,
    events: Arc<dyn EventRegistry>,
    capacity: Arc<dyn CapacityStore>,
    ledger: Arc<dyn ReservationLedger>,
    channel: Arc<dyn RequestChannel>,
    producer: BookingProducer,
    workers: Option<Arc<WorkerPool>>,
}

impl AppState {
    /// Build the state over a store that serves events, capacity and tickets.
    pub fn new<S>(
        config: Config,
        store: Arc<S>,
        channel: Arc<dyn RequestChannel>,
        workers: Option<Arc<WorkerPool>>,
    ) -> Self
    where
        S: EventRegistry + CapacityStore + ReservationLedger + 'static,
    {
        Self {
            config,
            events: Arc::clone(&store) as Arc<dyn EventRegistry>,
            capacity: Arc::clone(&store) as Arc<dyn CapacityStore>,
            ledger: store as Arc<dyn ReservationLedger>,
            producer: BookingProducer::new(Arc::clone(&channel)),
            channel,
            workers,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &dyn EventRegistry {
        self.events.as_ref()
    }

    pub fn capacity(&self) -> &dyn CapacityStore {
        self.capacity.as_ref()
    }

    pub fn ledger(&self) -> &dyn ReservationLedger {
        self.ledger.as_ref()
    }

    pub fn channel(&self) -> &dyn RequestChannel {
        self.channel.as_ref()
    }

    pub fn producer(&self) -> &BookingProducer {
        &self.producer
    }

    pub fn workers(&self) -> Option<&Arc<WorkerPool>> {
        self.workers.as_ref()
    }
}
