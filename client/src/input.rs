//! Outbound input queue with pointer-move coalescing

use shared::protocol::MOUSE_MOTION;
use shared::{InputBatch, InputEvent};

/// Collects local input between flushes
///
/// Consecutive pointer moves collapse into the most recent one, so a fast
/// mouse costs one event per flush instead of one per frame. Any other event
/// ends the run and is kept as is.
#[derive(Debug, Default)]
pub struct InputQueue {
    events: Vec<InputEvent>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: impl Into<InputEvent>) {
        let event = event.into();
        if event.event_type == MOUSE_MOTION {
            if let Some(last) = self.events.last_mut() {
                if last.event_type == MOUSE_MOTION {
                    *last = event;
                    return;
                }
            }
        }
        self.events.push(event);
    }

    /// Takes everything queued as one batch, or `None` when nothing is queued
    pub fn flush(&mut self) -> Option<InputBatch> {
        if self.events.is_empty() {
            return None;
        }
        Some(InputBatch {
            events: std::mem::take(&mut self.events),
            time: None,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
