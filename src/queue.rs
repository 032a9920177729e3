//! Outbound queue
//!
//! FIFO buffer decoupling point-driven bus-write production from the
//! fixed-rate dispatcher. Strictly arrival-ordered across all points, no
//! coalescing, no deduplication. Bounded, with an explicit overflow
//! policy instead of unbounded growth.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::codec::GroupValue;
use crate::error::{BridgeError, Result};

/// One pending bus write. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundItem {
    pub address: String,
    pub value: GroupValue,
    pub dpt: String,
}

/// What to do with a new item when the queue is at capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending item to make room (favors fresh data)
    #[default]
    DropOldest,
    /// Discard the incoming item
    DropNewest,
    /// Fail the enqueue with [`BridgeError::QueueFull`]
    Reject,
}

/// Bounded FIFO of pending bus writes.
#[derive(Debug)]
pub struct OutboundQueue {
    items: Mutex<VecDeque<OutboundItem>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl OutboundQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            policy,
        }
    }

    /// Append an item at the back, applying the overflow policy when full.
    pub async fn enqueue(&self, item: OutboundItem) -> Result<()> {
        let mut items = self.items.lock().await;
        if items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    if let Some(dropped) = items.pop_front() {
                        warn!(
                            "Outbound queue full ({}), dropping oldest item for {}",
                            self.capacity, dropped.address
                        );
                    }
                },
                OverflowPolicy::DropNewest => {
                    warn!(
                        "Outbound queue full ({}), dropping new item for {}",
                        self.capacity, item.address
                    );
                    return Ok(());
                },
                OverflowPolicy::Reject => {
                    return Err(BridgeError::QueueFull(format!(
                        "capacity {} reached, rejecting item for {}",
                        self.capacity, item.address
                    )));
                },
            }
        }
        items.push_back(item);
        Ok(())
    }

    /// Remove and return the front item, `None` when empty.
    pub async fn dequeue(&self) -> Option<OutboundItem> {
        self.items.lock().await.pop_front()
    }

    /// Non-destructively read the front item.
    pub async fn peek(&self) -> Option<OutboundItem> {
        self.items.lock().await.front().cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
