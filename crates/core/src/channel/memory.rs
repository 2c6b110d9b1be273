//! In-process request channel.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{encode_request, Acker, ChannelError, Delivery, DeliveryTag, RequestChannel};
use crate::booking::BookingRequest;

#[derive(Debug, Clone)]
struct Message {
    id: i64,
    event_id: String,
    body: Vec<u8>,
    visible_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<i64, (String, Message)>,
    next_id: i64,
    closed: bool,
}

enum Poll {
    Ready(Option<Delivery>),
    WaitUntil(Instant),
    Wait,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, ChannelError> {
        self.state
            .lock()
            .map_err(|_| ChannelError::Unavailable("queue lock poisoned".to_string()))
    }
}

impl Acker for Shared {
    fn ack(&self, tag: &DeliveryTag) -> Result<(), ChannelError> {
        let mut state = self.lock()?;
        match state.in_flight.get(&tag.message_id) {
            Some((lease, _)) if *lease == tag.lease => {
                state.in_flight.remove(&tag.message_id);
            }
            _ => debug!("Ignoring ack for stale delivery {}", tag),
        }
        Ok(())
    }

    fn nack(&self, tag: &DeliveryTag, delay: Duration) -> Result<(), ChannelError> {
        {
            let mut state = self.lock()?;
            let current = matches!(
                state.in_flight.get(&tag.message_id),
                Some((lease, _)) if *lease == tag.lease
            );
            if !current {
                debug!("Ignoring nack for stale delivery {}", tag);
                return Ok(());
            }
            if let Some((_, mut message)) = state.in_flight.remove(&tag.message_id) {
                message.visible_at = Instant::now() + delay;
                state.ready.push_back(message);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

/// In-process queue with the same delivery semantics as the durable one.
///
/// Messages live only as long as the process; intended for tests and for
/// single-process deployments that accept losing queued requests on restart.
pub struct MemoryRequestChannel {
    shared: Arc<Shared>,
}

impl Default for MemoryRequestChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRequestChannel {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Stop handing out messages. Pending receivers return `None`.
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.lock() {
            state.closed = true;
        }
        self.shared.notify.notify_waiters();
    }

    /// Number of messages waiting or in flight, across all events.
    pub fn len(&self) -> usize {
        self.shared
            .lock()
            .map(|state| state.ready.len() + state.in_flight.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poll_visible(&self) -> Result<Poll, ChannelError> {
        let mut state = self.shared.lock()?;
        if state.closed {
            return Ok(Poll::Ready(None));
        }

        let now = Instant::now();
        let Some(position) = state.ready.iter().position(|m| m.visible_at <= now) else {
            // Nothing visible yet: wake up with the earliest delayed message.
            return Ok(match state.ready.iter().map(|m| m.visible_at).min() {
                Some(at) => Poll::WaitUntil(at),
                None => Poll::Wait,
            });
        };

        let Some(mut message) = state.ready.remove(position) else {
            return Ok(Poll::Wait);
        };
        message.delivery_count += 1;
        let lease = uuid::Uuid::new_v4().to_string();
        let delivery = Delivery::new(
            DeliveryTag {
                message_id: message.id,
                lease: lease.clone(),
            },
            message.body.clone(),
            message.delivery_count,
            Arc::clone(&self.shared) as Arc<dyn Acker>,
        );
        state.in_flight.insert(message.id, (lease, message));
        Ok(Poll::Ready(Some(delivery)))
    }
}

#[async_trait]
impl RequestChannel for MemoryRequestChannel {
    async fn publish(&self, request: &BookingRequest) -> Result<(), ChannelError> {
        let body = encode_request(request)?;
        {
            let mut state = self.shared.lock()?;
            if state.closed {
                return Err(ChannelError::Closed);
            }
            state.next_id += 1;
            let id = state.next_id;
            state.ready.push_back(Message {
                id,
                event_id: request.event_id.clone(),
                body,
                visible_at: Instant::now(),
                delivery_count: 0,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, ChannelError> {
        loop {
            // Register interest before looking at the queue so a publish
            // between the check and the wait is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.poll_visible()? {
                Poll::Ready(delivery) => return Ok(delivery),
                Poll::WaitUntil(wake_at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(wake_at) => {}
                    }
                }
                Poll::Wait => notified.await,
            }
        }
    }

    async fn pending_count(&self, event_id: &str) -> Result<u64, ChannelError> {
        let state = self.shared.lock()?;
        let ready = state.ready.iter().filter(|m| m.event_id == event_id).count();
        let in_flight = state
            .in_flight
            .values()
            .filter(|(_, m)| m.event_id == event_id)
            .count();
        Ok((ready + in_flight) as u64)
    }
}
