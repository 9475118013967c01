//! # Behavioral Collector
//!
//! One per reading attempt. Listens to the host's event bus while Active, freezes on stop.
//!
//! - Scroll depth: `(scroll_top + viewport_height) / document_height * 100`, clamped, max kept
//! - Scroll and pointer counts: one per event, no throttling
//! - Focus: blur closes the open interval, focus opens a new one; the open interval is
//!   added at read time without being stored
//!
//! The subscription is the only observer handle. Dropping it (stop or drop) deregisters.
//! Each subscription queues every event until read, so a long dwell never loses a focus change.
use std::{
    future::pending,
    sync::{Arc, Mutex, MutexGuard},
};

use payloads::{Clock, MetricsSnapshot};
use tokio::sync::mpsc::{
    UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel,
};

use crate::fingerprint::{EnvironmentSignals, generate};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReaderEvent {
    Scroll {
        scroll_top: f64,
        viewport_height: f64,
        document_height: f64,
    },
    PointerMove,
    Focus,
    Blur,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub at_ms: i64,
    pub event: ReaderEvent,
}

impl TimedEvent {
    pub fn new(at_ms: i64, event: ReaderEvent) -> Self {
        Self { at_ms, event }
    }
}

/// What the host publishes window events on. Clones share the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<UnboundedSender<TimedEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<UnboundedSender<TimedEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TimedEvent> {
        let (sender, receiver) = unbounded_channel();
        self.lock().push(sender);
        receiver
    }

    /// Delivers to every live subscriber and returns how many there were.
    pub fn publish(&self, event: TimedEvent) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| subscriber.send(event).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|subscriber| !subscriber.is_closed());
        subscribers.len()
    }
}

fn scroll_depth(scroll_top: f64, viewport_height: f64, document_height: f64) -> Option<f64> {
    if !(scroll_top.is_finite() && viewport_height.is_finite() && document_height.is_finite())
        || document_height <= 0.0
    {
        return None;
    }

    Some(((scroll_top + viewport_height) / document_height * 100.0).clamp(0.0, 100.0))
}

#[derive(Debug, Clone, PartialEq)]
struct Tracker {
    max_depth: f64,
    scroll_events: u64,
    pointer_moves: u64,
    focus_ms: u64,
    focused: bool,
    last_focus_change_ms: i64,
}

impl Tracker {
    fn new(now_ms: i64, focused: bool) -> Self {
        Self {
            max_depth: 0.0,
            scroll_events: 0,
            pointer_moves: 0,
            focus_ms: 0,
            focused,
            last_focus_change_ms: now_ms,
        }
    }

    fn apply(&mut self, timed: &TimedEvent) {
        match timed.event {
            ReaderEvent::Scroll {
                scroll_top,
                viewport_height,
                document_height,
            } => {
                self.scroll_events += 1;
                if let Some(depth) = scroll_depth(scroll_top, viewport_height, document_height) {
                    self.max_depth = self.max_depth.max(depth);
                }
            }
            ReaderEvent::PointerMove => self.pointer_moves += 1,
            ReaderEvent::Blur => {
                if self.focused {
                    self.focus_ms += self.open_interval(timed.at_ms);
                    self.focused = false;
                }
                self.last_focus_change_ms = self.last_focus_change_ms.max(timed.at_ms);
            }
            ReaderEvent::Focus => {
                if !self.focused {
                    self.focused = true;
                    self.last_focus_change_ms = self.last_focus_change_ms.max(timed.at_ms);
                }
            }
        }
    }

    fn open_interval(&self, now_ms: i64) -> u64 {
        (now_ms - self.last_focus_change_ms).max(0) as u64
    }

    fn focus_total(&self, now_ms: i64) -> u64 {
        if self.focused {
            self.focus_ms + self.open_interval(now_ms)
        } else {
            self.focus_ms
        }
    }

    /// Folds the open interval into the total, as if the window blurred now.
    fn close(&mut self, now_ms: i64) {
        if self.focused {
            self.focus_ms += self.open_interval(now_ms);
            self.last_focus_change_ms = self.last_focus_change_ms.max(now_ms);
        }
    }
}

enum Phase {
    Active(UnboundedReceiver<TimedEvent>),
    Stopped(MetricsSnapshot),
}

pub struct Collector {
    fingerprint: String,
    session_start_ms: i64,
    clock: Arc<dyn Clock>,
    tracker: Tracker,
    phase: Phase,
}

impl Collector {
    /// Subscribes to `bus` and starts observing. `focused` is whether the window has focus right now.
    pub fn start(
        bus: &EventBus,
        signals: &EnvironmentSignals,
        clock: Arc<dyn Clock>,
        focused: bool,
    ) -> Self {
        let receiver = bus.subscribe();
        let session_start_ms = clock.now_ms();

        Self {
            fingerprint: generate(signals),
            session_start_ms,
            tracker: Tracker::new(session_start_ms, focused),
            clock,
            phase: Phase::Active(receiver),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    fn drain(&mut self) {
        let Phase::Active(receiver) = &mut self.phase else {
            return;
        };

        loop {
            match receiver.try_recv() {
                Ok(timed) => self.tracker.apply(&timed),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
    }

    /// Waits for the next host event and folds it in. Never resolves once stopped or
    /// once the bus is gone, so it can sit in a `select!` next to a timer.
    pub async fn observe(&mut self) {
        let Phase::Active(receiver) = &mut self.phase else {
            return pending().await;
        };

        match receiver.recv().await {
            Some(timed) => self.tracker.apply(&timed),
            None => pending().await,
        }
    }

    fn build(&self, focus_ms: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            scroll_depth_percent: self.tracker.max_depth,
            scroll_event_count: self.tracker.scroll_events,
            pointer_movement_count: self.tracker.pointer_moves,
            cumulative_focus_duration_ms: focus_ms,
            fingerprint: self.fingerprint.clone(),
            session_start_timestamp: self.session_start_ms,
        }
    }

    /// Current metrics. Does not stop observing. After `stop`, the frozen snapshot.
    pub fn snapshot(&mut self) -> MetricsSnapshot {
        if let Phase::Stopped(frozen) = &self.phase {
            return frozen.clone();
        }

        self.drain();
        self.build(self.tracker.focus_total(self.clock.now_ms()))
    }

    pub fn stop(&mut self) -> MetricsSnapshot {
        if let Phase::Stopped(frozen) = &self.phase {
            return frozen.clone();
        }

        self.drain();
        self.tracker.close(self.clock.now_ms());

        let frozen = self.build(self.tracker.focus_ms);
        // drops the receiver
        self.phase = Phase::Stopped(frozen.clone());
        frozen
    }
}
