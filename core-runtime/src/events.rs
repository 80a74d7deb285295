//! # Event Bus System
//!
//! Provides lifecycle notifications for chart refreshes using
//! `tokio::sync::broadcast`. Per-item progress for a single refresh travels on
//! the coordinator's own update channel; the bus carries the coarse events
//! that any number of observers may want (status bars, log shippers, tests).
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, RankingEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Ranking(RankingEvent::RefreshStarted {
//!         session_id: "a1".to_string(),
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Chart refresh started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events. Non-fatal.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Chart refresh lifecycle events
    Ranking(RankingEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Ranking(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Ranking(event) => match event {
                RankingEvent::ItemFailed { .. } | RankingEvent::RefreshDiscarded { .. } => {
                    EventSeverity::Warning
                }
                RankingEvent::RefreshStarted { .. } | RankingEvent::RefreshCompleted { .. } => {
                    EventSeverity::Info
                }
                RankingEvent::ItemEnriched { .. } => EventSeverity::Debug,
            },
        }
    }

    /// Session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            CoreEvent::Ranking(e) => e.session_id(),
        }
    }
}

/// Ordered so subscribers can filter with `>=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
}

/// Events emitted while a chart refresh runs.
///
/// `session_id` is the refresh's session token rendered as a string, so
/// observers can tell overlapping refreshes apart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RankingEvent {
    /// A refresh was stamped and began loading.
    RefreshStarted { session_id: String },
    /// One chart row was enriched successfully.
    ItemEnriched { session_id: String, rank: u32 },
    /// One chart row kept its fallback data.
    ItemFailed {
        session_id: String,
        rank: u32,
        /// Human-readable failure cause.
        message: String,
    },
    /// The final list was applied to shared state.
    RefreshCompleted { session_id: String, item_count: usize },
    /// A newer refresh superseded this one; its final list was dropped.
    RefreshDiscarded { session_id: String },
}

impl RankingEvent {
    fn description(&self) -> &str {
        match self {
            RankingEvent::RefreshStarted { .. } => "Chart refresh started",
            RankingEvent::ItemEnriched { .. } => "Chart item enriched",
            RankingEvent::ItemFailed { .. } => "Chart item enrichment failed",
            RankingEvent::RefreshCompleted { .. } => "Chart refresh completed",
            RankingEvent::RefreshDiscarded { .. } => "Stale chart refresh discarded",
        }
    }

    fn session_id(&self) -> &str {
        match self {
            RankingEvent::RefreshStarted { session_id }
            | RankingEvent::ItemEnriched { session_id, .. }
            | RankingEvent::ItemFailed { session_id, .. }
            | RankingEvent::RefreshCompleted { session_id, .. }
            | RankingEvent::RefreshDiscarded { session_id } => session_id,
        }
    }
}

/// Broadcast channel shared by every publisher of refresh events. Clones
/// publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// `capacity` events are buffered per subscriber before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of receivers reached; errors when nobody is subscribed.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Subscriber that skips events rejected by an optional predicate.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream, RankingEvent};
///
/// let event_bus = EventBus::new(100);
/// let failures = EventStream::new(event_bus.subscribe()).filter(|event| {
///     matches!(event, CoreEvent::Ranking(RankingEvent::ItemFailed { .. }))
/// });
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Keep only events for which `predicate` returns true.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next accepted event. Lagging and closing surface as [`RecvError`].
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing
    /// accepted is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
