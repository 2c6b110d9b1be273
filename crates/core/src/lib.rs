pub mod admission;
pub mod booking;
pub mod channel;
pub mod config;
pub mod metrics;
pub mod store;
pub mod testing;
pub mod worker;

pub use admission::{
    AdmissionEngine, AdmissionError, AdmissionOutcome, AdmissionState, RejectionReason,
};
pub use booking::{
    BookingProducer, BookingRequest, CreateEventRequest, Event, NewBooking, ProducerError,
    Rejection, Reservation, UpdateEventRequest,
};
pub use channel::{
    consume, ChannelError, Delivery, DeliveryTag, MemoryRequestChannel, RequestChannel,
    SqliteChannelOptions, SqliteRequestChannel,
};
pub use config::{
    config_path_from_env, load_config, load_config_from_str, validate_config, ChannelBackend, ChannelConfig, Config,
    ConfigError, DatabaseConfig, ServerConfig,
};
pub use store::{
    CapacityStore, EventRegistry, MemoryStore, ReservationLedger, ReserveOutcome, SqliteStore,
    StoreError,
};
pub use worker::{
    OutcomeCallback, OutcomeReport, RetryConfig, RetryPolicy, WorkerConfig, WorkerError,
    WorkerPool, WorkerPoolStatus,
};
