//! Request channel: at-least-once, unordered delivery of booking requests.
//!
//! Producers `publish` serialized requests; workers `receive` deliveries and
//! must settle each one:
//! - `ack` once a terminal admission decision has been reached
//! - `nack` with a delay after a transient failure
//! - dropping an unsettled delivery hands it back for redelivery
//!
//! Duplicates are possible (a lease can expire while a worker is still busy),
//! which is why every request carries its own idempotency key.

mod memory;
mod sqlite;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use tracing::warn;

use crate::booking::BookingRequest;

pub use memory::MemoryRequestChannel;
pub use sqlite::{SqliteChannelOptions, SqliteRequestChannel};

/// Errors that can occur on the request channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has been closed.
    #[error("channel closed")]
    Closed,

    /// A request could not be serialized.
    #[error("failed to encode booking request: {0}")]
    Encode(String),

    /// A message body is not a valid booking request.
    #[error("malformed message: {0}")]
    Decode(String),

    /// The underlying queue is unreachable.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Identifies one lease on one queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTag {
    pub message_id: i64,
    pub lease: String,
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.message_id, self.lease)
    }
}

/// Backend side of delivery settlement.
pub trait Acker: Send + Sync {
    /// Remove the message permanently.
    fn ack(&self, tag: &DeliveryTag) -> Result<(), ChannelError>;

    /// Return the message to the queue, visible again after `delay`.
    fn nack(&self, tag: &DeliveryTag, delay: Duration) -> Result<(), ChannelError>;
}

/// A received message together with its acknowledgement handle.
pub struct Delivery {
    tag: DeliveryTag,
    body: Vec<u8>,
    delivery_count: u32,
    acker: Arc<dyn Acker>,
    settled: bool,
}

impl Delivery {
    pub fn new(
        tag: DeliveryTag,
        body: Vec<u8>,
        delivery_count: u32,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            tag,
            body,
            delivery_count,
            acker,
            settled: false,
        }
    }

    /// Decode the body as a booking request.
    pub fn decode(&self) -> Result<BookingRequest, ChannelError> {
        decode_request(&self.body)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn tag(&self) -> &DeliveryTag {
        &self.tag
    }

    /// How many times this message has been handed out, this one included.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Whether the message was delivered before.
    pub fn redelivered(&self) -> bool {
        self.delivery_count > 1
    }

    /// Acknowledge the message; it will not be delivered again.
    pub fn ack(mut self) -> Result<(), ChannelError> {
        self.settled = true;
        self.acker.ack(&self.tag)
    }

    /// Reject the message for now; it becomes visible again after `delay`.
    pub fn nack(mut self, delay: Duration) -> Result<(), ChannelError> {
        self.settled = true;
        self.acker.nack(&self.tag, delay)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("delivery_count", &self.delivery_count)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if !self.settled {
            if let Err(e) = self.acker.nack(&self.tag, Duration::ZERO) {
                warn!("Failed to release abandoned delivery {}: {}", self.tag, e);
            }
        }
    }
}

/// Delivery channel between the booking producer and the worker pool.
#[async_trait]
pub trait RequestChannel: Send + Sync {
    /// Queue a booking request. An error means it was not queued.
    async fn publish(&self, request: &BookingRequest) -> Result<(), ChannelError>;

    /// Wait for the next visible message. `None` once the channel is closed.
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError>;

    /// Approximate number of unacknowledged requests for an event.
    async fn pending_count(&self, event_id: &str) -> Result<u64, ChannelError>;
}

/// Lazily consume a channel as a stream of deliveries.
///
/// The stream ends when the channel is closed. Receive errors are yielded
/// and do not end the stream.
pub fn consume(channel: Arc<dyn RequestChannel>) -> BoxStream<'static, Result<Delivery, ChannelError>> {
    stream::unfold(channel, |channel| async move {
        match channel.receive().await {
            Ok(Some(delivery)) => Some((Ok(delivery), channel)),
            Ok(None) => None,
            Err(e) => Some((Err(e), channel)),
        }
    })
    .boxed()
}

pub(crate) fn encode_request(request: &BookingRequest) -> Result<Vec<u8>, ChannelError> {
    serde_json::to_vec(request).map_err(|e| ChannelError::Encode(e.to_string()))
}

pub(crate) fn decode_request(body: &[u8]) -> Result<BookingRequest, ChannelError> {
    serde_json::from_slice(body).map_err(|e| ChannelError::Decode(e.to_string()))
}
