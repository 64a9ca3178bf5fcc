//! Job progress events
//!
//! The workflow broadcasts every state change on an [`EventBus`] built on
//! `tokio::sync::broadcast`. Emitting never blocks: with no subscribers the
//! event is dropped, and a lagging subscriber loses the oldest events.
//!
//! # Example
//!
//! ```no_run
//! use libmediacast::events::{Event, EventBus};
//!
//! # async fn example() {
//! let bus = EventBus::new(100);
//! let mut receiver = bus.subscribe();
//!
//! bus.emit(Event::JobStarted {
//!     job_id: "job-1".to_string(),
//!     account_id: "meta-17841400000".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ContainerStatus, PublishResult};
use crate::workflow::JobState;

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer before lagging receivers drop events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobStarted {
        job_id: String,
        account_id: String,
    },

    StateChanged {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    ContainerCreated {
        job_id: String,
        container_id: String,
    },

    /// One status check completed
    PollTick {
        job_id: String,
        attempt: u32,
        status: Option<ContainerStatus>,
    },

    JobFinished {
        job_id: String,
        state: JobState,
        result: PublishResult,
    },
}

impl Event {
    pub fn job_id(&self) -> &str {
        match self {
            Event::JobStarted { job_id, .. }
            | Event::StateChanged { job_id, .. }
            | Event::ContainerCreated { job_id, .. }
            | Event::PollTick { job_id, .. }
            | Event::JobFinished { job_id, .. } => job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_emission_and_subscription() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.emit(Event::ContainerCreated {
            job_id: "job-1".to_string(),
            container_id: "17900000".to_string(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.job_id(), "job-1");
        assert!(matches!(received, Event::ContainerCreated { .. }));
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(Event::StateChanged {
            job_id: "job-2".to_string(),
            from: JobState::Pending,
            to: JobState::ContainerCreating,
        });

        assert_eq!(first.recv().await.unwrap(), second.recv().await.unwrap());
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(10);
        bus.emit(Event::JobStarted {
            job_id: "job-3".to_string(),
            account_id: "youtube-UC1".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::PollTick {
            job_id: "job-4".to_string(),
            attempt: 3,
            status: Some(ContainerStatus::Processing),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "poll_tick");
        assert_eq!(json["attempt"], 3);
        assert_eq!(json["status"], "PROCESSING");
    }
}
