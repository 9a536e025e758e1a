//! Typed event streams for recognizer fan-out.
//!
//! Each recognizer exposes six named streams; each stream is a typed
//! callback registry with a synchronous [`EventStream::signal`]. Dispatch
//! happens on the caller's task in registration order, so events observed by
//! one subscriber are never reordered relative to the upstream reader.
//!
//! Callbacks registered by the client bridge capture only its outbound
//! channel, never the recognizer itself, so streams owned by a recognizer
//! form no reference cycle.

use parking_lot::RwLock;
use serde::Serialize;

/// A registered event callback.
type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

/// A single typed event stream.
///
/// `signal` invokes every registered callback synchronously; `disconnect_all`
/// drops all callbacks atomically, after which signals are no-ops.
pub struct EventStream<T> {
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T> EventStream<T> {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Registers a callback.
    pub fn connect<F>(&self, callback: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Box::new(callback));
    }

    /// Invokes every registered callback with `event`, on the caller's task.
    pub fn signal(&self, event: &T) {
        for callback in self.callbacks.read().iter() {
            callback(event);
        }
    }

    /// Drops all registered callbacks atomically.
    pub fn disconnect_all(&self) {
        self.callbacks.write().clear();
    }

    /// Returns the number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

impl<T> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Payload of `session_started` / `session_stopped` events.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Id of the session the event belongs to.
    pub session_id: String,
}

/// Whether speech activity started or ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeechActivityKind {
    Start,
    End,
}

/// Payload of the `speech_detected` stream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechActivity {
    pub kind: SpeechActivityKind,
    /// Offset from the start of the audio stream (ns), when known.
    pub offset_nanos: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn signal_reaches_every_callback() {
        let stream: EventStream<u32> = EventStream::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            stream.connect(move |v| {
                count.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        stream.signal(&2);
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let stream: EventStream<()> = EventStream::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..4 {
            let order = Arc::clone(&order);
            stream.connect(move |()| order.lock().push(i));
        }

        stream.signal(&());
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn disconnect_all_drops_every_callback() {
        let stream: EventStream<()> = EventStream::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        stream.connect(move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(stream.len(), 1);

        stream.disconnect_all();
        assert!(stream.is_empty());

        stream.signal(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn signal_on_empty_stream_is_a_noop() {
        let stream: EventStream<String> = EventStream::new();
        stream.signal(&"nobody listening".to_string());
    }
}
