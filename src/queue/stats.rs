//! Point-in-time queue statistics

use super::store::QueueState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Messages per minute over the throughput window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub sent_per_minute: f64,
    pub received_per_minute: f64,
    pub window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    /// Live messages, in flight included
    pub message_count: usize,
    /// Deliverable now
    pub visible_count: usize,
    /// Received and not yet settled
    pub in_flight_count: usize,
    /// Waiting on a delay or retry backoff
    pub delayed_count: usize,
    /// Size of the queue's dead-letter store
    pub dead_letter_count: usize,
    pub oldest_message_age_ms: Option<i64>,
    pub max_size: usize,
    pub throughput: Throughput,
    pub timestamp: DateTime<Utc>,
}

impl QueueStats {
    /// Count messages in `state`; dead letters and throughput come from elsewhere
    pub fn from_state(state: &QueueState, now: DateTime<Utc>) -> Self {
        let in_flight_count = state
            .messages
            .iter()
            .filter(|m| state.is_in_flight(&m.id))
            .count();
        let delayed_count = state
            .messages
            .iter()
            .filter(|m| !state.is_in_flight(&m.id) && m.is_delayed(now))
            .count();
        // TTL-expired messages wait for the next receive to dead-letter them
        let visible_count = state
            .messages
            .iter()
            .filter(|m| !state.is_in_flight(&m.id) && !m.is_delayed(now) && !m.is_expired(now))
            .count();

        Self {
            queue_name: state.name().to_string(),
            message_count: state.len(),
            visible_count,
            in_flight_count,
            delayed_count,
            dead_letter_count: 0,
            oldest_message_age_ms: state
                .messages
                .iter()
                .map(|m| m.created_at)
                .min()
                .map(|oldest| (now - oldest).num_milliseconds()),
            max_size: state.config.max_size,
            throughput: Throughput::default(),
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::config::QueueConfig;
    use crate::queue::message::{Message, SendOptions};
    use serde_json::json;

    #[test]
    fn test_counts() {
        let mut state = QueueState::new(QueueConfig::new("jobs"));
        let visible = Message::new("t", json!(1), &SendOptions::new(), 0);
        let delayed = Message::new("t", json!(2), &SendOptions::new().with_delay_seconds(60), 0);
        let leased = Message::new("t", json!(3), &SendOptions::new(), 0);
        let leased_id = leased.id.clone();

        state.enqueue(visible);
        state.enqueue(delayed);
        state.enqueue(leased);
        let now = Utc::now();
        state.lease(&leased_id, now);

        let stats = QueueStats::from_state(&state, now);
        assert_eq!(stats.message_count, 3);
        assert_eq!(stats.visible_count, 1);
        assert_eq!(stats.in_flight_count, 1);
        assert_eq!(stats.delayed_count, 1);
        assert!(stats.oldest_message_age_ms.unwrap() >= 0);
    }

    #[test]
    fn test_expired_messages_are_not_visible() {
        let mut state = QueueState::new(QueueConfig::new("jobs"));
        state.enqueue(Message::new("t", json!(1), &SendOptions::new().with_ttl_ms(10), 0));
        state.enqueue(Message::new("t", json!(2), &SendOptions::new(), 0));

        let later = Utc::now() + chrono::Duration::milliseconds(50);
        let stats = QueueStats::from_state(&state, later);
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.visible_count, 1);
    }

    #[test]
    fn test_empty_queue() {
        let state = QueueState::new(QueueConfig::new("jobs"));
        let stats = QueueStats::from_state(&state, Utc::now());
        assert_eq!(stats.message_count, 0);
        assert!(stats.oldest_message_age_ms.is_none());
    }
}
