//! Lifecycle and progress events
//!
//! Every event goes to two places, in the same order:
//! - the single-consumer presentation stream ([`EventStream`]), which never
//!   drops events
//! - a broadcast fan-out for extra observers (logging, tests), where a slow
//!   observer may lag and miss events

use crate::lifecycle::Phase;
use crate::unit::UnitId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use wb_history::HistoryState;

/// Progress of a running unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    /// 0..=100
    Percent(u8),
    Indeterminate,
}

/// Status change or progress report of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEvent {
    pub unit_id: UnitId,
    pub unit_name: String,
    /// Submission order of the unit
    pub sequence: u64,
    pub phase: Phase,
    pub progress: Option<Progress>,
    pub message: String,
}

/// Anything the core reports to presentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Unit(UnitEvent),
    History(HistoryState),
}

impl Event {
    /// Unit event, if this is one
    #[must_use]
    pub fn as_unit(&self) -> Option<&UnitEvent> {
        match self {
            Self::Unit(e) => Some(e),
            Self::History(_) => None,
        }
    }
}

/// Receiving end of the presentation event stream
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Next event, or `None` once the scheduler is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Every queued event, without waiting
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

/// Producer side shared by the worker and running units
#[derive(Debug)]
pub(crate) struct EventSink {
    // Serializes emission so both outputs see one order.
    tx: Mutex<mpsc::UnboundedSender<Event>>,
    rx: Mutex<Option<EventStream>>,
    observers: broadcast::Sender<Event>,
}

impl EventSink {
    pub(crate) fn new(observer_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (observers, _) = broadcast::channel(observer_capacity.max(1));
        Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(Some(EventStream { rx })),
            observers,
        }
    }

    pub(crate) fn emit(&self, event: Event) {
        let tx = self.tx.lock();
        // Nobody listening is fine for both outputs.
        let _ = self.observers.send(event.clone());
        let _ = tx.send(event);
    }

    pub(crate) fn take_stream(&self) -> Option<EventStream> {
        self.rx.lock().take()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.observers.subscribe()
    }
}
