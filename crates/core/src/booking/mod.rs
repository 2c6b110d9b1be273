//! Booking requests and their producer side.

mod producer;
mod types;

pub use producer::{BookingProducer, NewBooking, ProducerError};
pub use types::*;
