//! Multicast event stream with explicit terminal semantics
//!
//! An [`EventStream`] is the publishing side held by a registry entry; each
//! caller receives its own [`Subscription`]. A stream carries values until it
//! is terminated exactly once, either by `finish` or by `fail`. Sends after
//! termination are dropped. A subscription taken on an already terminated
//! stream observes the terminal signal immediately.
//!
//! Delivery uses one unbounded channel per subscriber so a slow consumer
//! never loses or reorders events.

use crate::error::GattError;
use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// A single item observed by a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    Value(T),
    /// Clean terminal signal
    Finished,
    /// Error terminal signal
    Failed(GattError),
}

impl<T> StreamEvent<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Value(_))
    }
}

#[derive(Debug, Clone)]
enum Terminal {
    Finished,
    Failed(GattError),
}

struct StreamState<T> {
    subscribers: Vec<mpsc::UnboundedSender<StreamEvent<T>>>,
    terminal: Option<Terminal>,
}

/// Publishing side of a multicast stream
pub struct EventStream<T> {
    id: u64,
    state: Arc<Mutex<StreamState<T>>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("subscribers", &state.subscribers.len())
            .field("terminal", &state.terminal)
            .finish()
    }
}

impl<T: Clone> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventStream<T> {
    /// Create a live stream with no subscribers
    pub fn new() -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(StreamState {
                subscribers: Vec::new(),
                terminal: None,
            })),
        }
    }

    /// Process-unique identity; two handles with the same id share state
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Attach a new subscriber.
    ///
    /// Only events published after this call are observed, except that a
    /// terminated stream replays its terminal signal.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        match &state.terminal {
            Some(Terminal::Finished) => {
                let _ = tx.send(StreamEvent::Finished);
            }
            Some(Terminal::Failed(err)) => {
                let _ = tx.send(StreamEvent::Failed(err.clone()));
            }
            None => state.subscribers.push(tx),
        }
        Subscription {
            stream_id: self.id,
            rx,
            done: false,
        }
    }

    /// Publish a value to every live subscriber. Returns false if the
    /// stream is already terminated.
    pub fn send(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return false;
        }
        state
            .subscribers
            .retain(|tx| tx.send(StreamEvent::Value(value.clone())).is_ok());
        true
    }

    /// Terminate cleanly
    pub fn finish(&self) -> bool {
        self.terminate(Terminal::Finished)
    }

    /// Terminate with an error
    pub fn fail(&self, error: GattError) -> bool {
        self.terminate(Terminal::Failed(error))
    }

    fn terminate(&self, terminal: Terminal) -> bool {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return false;
        }
        let event = match &terminal {
            Terminal::Finished => StreamEvent::Finished,
            Terminal::Failed(err) => StreamEvent::Failed(err.clone()),
        };
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(event.clone());
        }
        state.terminal = Some(terminal);
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    /// Number of subscribers that have not been dropped yet
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

/// Receiving side handed to one caller.
///
/// As a [`futures::Stream`] it yields `Ok(value)` for every value, a single
/// `Err` if the stream fails, and ends after either terminal signal.
#[derive(Debug)]
pub struct Subscription<T> {
    stream_id: u64,
    rx: mpsc::UnboundedReceiver<StreamEvent<T>>,
    done: bool,
}

impl<T: Clone> Subscription<T> {
    /// A subscription that is already terminated with `error`, for
    /// requests rejected before reaching the hardware
    pub fn failed(error: GattError) -> Self {
        let stream = EventStream::new();
        let subscription = stream.subscribe();
        stream.fail(error);
        subscription
    }
}

impl<T> Subscription<T> {
    /// Identity of the [`EventStream`] this subscription is attached to
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Next raw event; `None` once a terminal event has been returned
    pub async fn next_event(&mut self) -> Option<StreamEvent<T>> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await;
        match &event {
            Some(ev) if !ev.is_terminal() => {}
            _ => self.done = true,
        }
        event
    }

    /// Non-blocking variant of [`Subscription::next_event`]
    pub fn try_next_event(&mut self) -> Option<StreamEvent<T>> {
        if self.done {
            return None;
        }
        let event = self.rx.try_recv().ok()?;
        if event.is_terminal() {
            self.done = true;
        }
        Some(event)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Result<T, GattError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Value(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(StreamEvent::Failed(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(StreamEvent::Finished)) | Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
