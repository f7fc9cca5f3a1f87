//! Interlock monitor: polls digital inputs and turns level changes into
//! edge events.
//!
//! Two tasks run per monitor:
//! - the polling task samples every subscribed line once per interval,
//!   diffs each sample against the previous one and pushes one event per
//!   transition onto a bounded queue
//! - the dispatch task drains the queue and hands each event to the matching
//!   subscribers; handlers run on their own task so a slow handler never
//!   delays detection of the next edge
//!
//! The first sample of a line only establishes its baseline; it never fires.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::adapters::DigitalIo;
use crate::domain::{EdgeEvent, LineNumber};

use super::context::CellContext;
use super::flags::ControlFlags;

/// Receives edge events from the dispatch task
#[async_trait]
pub trait EdgeHandler: Send + Sync {
    async fn on_edge(&self, event: EdgeEvent);
}

enum Sink {
    Handler(Arc<dyn EdgeHandler>),
    Stream(mpsc::Sender<EdgeEvent>),
}

struct Subscription {
    line: LineNumber,
    level: bool,
    sink: Sink,
}

impl Subscription {
    fn matches(&self, event: &EdgeEvent) -> bool {
        self.line == event.line && self.level == event.level
    }
}

/// Stream of edges for one (line, level) subscription
pub struct EdgeStream {
    rx: mpsc::Receiver<EdgeEvent>,
}

impl EdgeStream {
    /// Next edge; `None` once the monitor has stopped
    pub async fn recv(&mut self) -> Option<EdgeEvent> {
        self.rx.recv().await
    }

    /// Next edge if one is already queued
    pub fn try_recv(&mut self) -> Option<EdgeEvent> {
        self.rx.try_recv().ok()
    }
}

/// Edge detector over a set of digital input lines
pub struct InterlockMonitor {
    io: Arc<dyn DigitalIo>,
    flags: Arc<ControlFlags>,
    poll_interval: Duration,
    capacity: usize,
    subscriptions: Vec<Subscription>,
}

impl InterlockMonitor {
    pub fn new(ctx: &CellContext) -> Self {
        Self {
            io: ctx.io.clone(),
            flags: ctx.flags.clone(),
            poll_interval: ctx.timing.interlock_poll,
            capacity: ctx.timing.edge_queue_capacity.max(1),
            subscriptions: Vec::new(),
        }
    }

    /// Call `handler` each time `line` changes to `level`
    pub fn on_edge(&mut self, line: LineNumber, level: bool, handler: Arc<dyn EdgeHandler>) {
        self.subscriptions.push(Subscription {
            line,
            level,
            sink: Sink::Handler(handler),
        });
    }

    /// Stream of events each time `line` changes to `level`
    pub fn subscribe(&mut self, line: LineNumber, level: bool) -> EdgeStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscriptions.push(Subscription {
            line,
            level,
            sink: Sink::Stream(tx),
        });
        EdgeStream { rx }
    }

    /// Lines that need sampling, in order
    pub fn monitored_lines(&self) -> Vec<LineNumber> {
        let lines: BTreeSet<LineNumber> = self.subscriptions.iter().map(|s| s.line).collect();
        lines.into_iter().collect()
    }

    /// Start the polling and dispatch tasks. Both stop when the AliveFlag latches.
    pub fn spawn(self) -> InterlockHandle {
        let (tx, rx) = mpsc::channel(self.capacity);
        let lines = self.monitored_lines();

        let poll = tokio::spawn(poll_loop(
            self.io.clone(),
            self.flags.clone(),
            lines,
            self.poll_interval,
            tx,
        ));
        let dispatch = tokio::spawn(dispatch_loop(self.flags, self.subscriptions, rx));

        InterlockHandle { poll, dispatch }
    }
}

/// Join handles for the monitor's tasks
pub struct InterlockHandle {
    poll: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl InterlockHandle {
    /// Wait for both tasks to finish
    pub async fn join(self) {
        if let Err(e) = self.poll.await {
            warn!(error = %e, "interlock polling task ended abnormally");
        }
        if let Err(e) = self.dispatch.await {
            warn!(error = %e, "edge dispatch task ended abnormally");
        }
    }
}

/// Compare a sample with the previous one; `Some(level)` on a transition
fn detect(previous: &mut HashMap<LineNumber, bool>, line: LineNumber, level: bool) -> Option<bool> {
    match previous.insert(line, level) {
        Some(prev) if prev != level => Some(level),
        _ => None,
    }
}

async fn poll_loop(
    io: Arc<dyn DigitalIo>,
    flags: Arc<ControlFlags>,
    lines: Vec<LineNumber>,
    interval: Duration,
    tx: mpsc::Sender<EdgeEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: HashMap<LineNumber, bool> = HashMap::new();

    debug!(?lines, interval_ms = interval.as_millis() as u64, "interlock polling started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = flags.alive().halted() => break,
        }

        for &line in &lines {
            let level = match io.read_digital(line).await {
                Ok(level) => level,
                Err(e) => {
                    // Keep the last good sample; the fault path handles dead controllers
                    debug!(line, error = %e, "interlock read failed");
                    continue;
                }
            };

            if let Some(level) = detect(&mut previous, line, level) {
                let event = EdgeEvent::new(line, level);
                debug!(line, level, "edge detected");

                tokio::select! {
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                    _ = flags.alive().halted() => return,
                }
            }
        }
    }

    debug!("interlock polling stopped");
}

async fn dispatch_loop(
    flags: Arc<ControlFlags>,
    subscriptions: Vec<Subscription>,
    mut rx: mpsc::Receiver<EdgeEvent>,
) {
    loop {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = flags.alive().halted() => break,
        };

        for sub in subscriptions.iter().filter(|s| s.matches(&event)) {
            match &sub.sink {
                Sink::Handler(handler) => {
                    let handler = handler.clone();
                    tokio::spawn(async move { handler.on_edge(event).await });
                }
                Sink::Stream(tx) => {
                    if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(event) {
                        warn!(line = event.line, level = event.level, "edge stream full, event dropped");
                    }
                }
            }
        }
    }

    debug!("edge dispatch stopped");
}
