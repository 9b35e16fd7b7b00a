//! Bounded event sink: the pipeline pushes incident transitions and
//! detector signals here without blocking; a slow or absent consumer
//! drops the oldest entry rather than stalling capture (spec §4.8).

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::aggregator::IncidentTransition;

#[derive(Clone, Debug)]
pub enum SinkEvent {
    Incident(IncidentTransition),
    WatermarkEmbedded { timestamp: f64, rgb: (u8, u8, u8) },
}

/// Fixed-capacity, drop-oldest-on-full queue. `dropped` counts events
/// evicted before a consumer ever saw them, surfaced so operators can tell
/// a quiet sink from a backed-up one.
pub struct EventSink {
    inner: Mutex<SinkState>,
    capacity: usize,
}

struct SinkState {
    queue: VecDeque<SinkEvent>,
    dropped: u64,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SinkState { queue: VecDeque::with_capacity(capacity), dropped: 0 }),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, event: SinkEvent) {
        let mut state = self.inner.lock().expect("sink mutex poisoned");
        if state.queue.len() >= self.capacity {
            state.queue.pop_front();
            state.dropped += 1;
        }
        state.queue.push_back(event);
    }

    pub fn drain(&self) -> Vec<SinkEvent> {
        let mut state = self.inner.lock().expect("sink mutex poisoned");
        state.queue.drain(..).collect()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().expect("sink mutex poisoned").dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("sink mutex poisoned").queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{Incident, IncidentKind};

    fn incident(id: &str) -> Incident {
        Incident {
            id: id.to_string(),
            kind: IncidentKind::Blur,
            subtype: None,
            first_seen_ts: 0.0,
            last_seen_ts: 0.0,
            count: 1,
            description: "test".to_string(),
        }
    }

    #[test]
    fn push_and_drain_preserves_order() {
        let sink = EventSink::new(4);
        sink.push(SinkEvent::Incident(IncidentTransition::Opened(incident("a"))));
        sink.push(SinkEvent::Incident(IncidentTransition::Opened(incident("b"))));
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn full_queue_drops_oldest_and_counts_it() {
        let sink = EventSink::new(2);
        sink.push(SinkEvent::Incident(IncidentTransition::Opened(incident("a"))));
        sink.push(SinkEvent::Incident(IncidentTransition::Opened(incident("b"))));
        sink.push(SinkEvent::Incident(IncidentTransition::Opened(incident("c"))));
        assert_eq!(sink.dropped_count(), 1);
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        match &drained[0] {
            SinkEvent::Incident(IncidentTransition::Opened(inc)) => assert_eq!(inc.id, "b"),
            other => panic!("unexpected event {:?}", other),
        }
    }
}
