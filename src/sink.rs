/// The event stream handed to callers by `MemoryWatcher::start`.
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Events emitted by a memory watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Memory usage became unacceptable; the process will be terminated
    /// once the grace period expires.
    Boom,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Boom => write!(f, "boom"),
        }
    }
}

/// Receive side of the watcher's single-slot event channel.
///
/// Clones share one underlying receiver: the single `Boom` goes to whichever
/// reader gets it first, and every read after the channel is closed returns
/// `None`.
#[derive(Debug, Clone)]
pub struct EventSink {
    rx: Arc<Mutex<mpsc::Receiver<EventType>>>,
}

/// Send side, owned by the watcher's worker task.
#[derive(Debug)]
pub(crate) struct EventSource {
    tx: Option<mpsc::Sender<EventType>>,
}

pub(crate) fn channel() -> (EventSource, EventSink) {
    let (tx, rx) = mpsc::channel(1);
    (
        EventSource { tx: Some(tx) },
        EventSink {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl EventSink {
    /// Wait for the next event. Returns `None` once the sink is closed and
    /// drained.
    pub async fn recv(&self) -> Option<EventType> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking read. `None` if no event is queued, whether or not the
    /// sink is closed, or if another reader is currently waiting.
    pub fn try_recv(&self) -> Option<EventType> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }
}

impl EventSource {
    /// Queue `event` and close the channel. Later calls do nothing.
    pub(crate) fn send_and_close(&mut self, event: EventType) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::warn!(error = %e, "memory watch event could not be queued");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}
