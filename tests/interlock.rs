//! Interlock Monitor Integration Tests
//!
//! Edge detection over polled inputs: one event per transition, nothing on
//! the initial sample, and handler dispatch that never blocks detection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cinchseal::adapters::SimulatedController;
use cinchseal::core::{CellContext, EdgeHandler, InterlockMonitor, Timing};
use cinchseal::domain::{Edge, EdgeEvent, LineMap};

fn context() -> (Arc<SimulatedController>, CellContext) {
    let sim = Arc::new(SimulatedController::new());
    let ctx = CellContext::new(sim.clone(), LineMap::default(), Timing::default());
    (sim, ctx)
}

async fn settle() {
    // A few poll intervals
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[derive(Default)]
struct Counter {
    hits: AtomicUsize,
}

#[async_trait]
impl EdgeHandler for Counter {
    async fn on_edge(&self, _event: EdgeEvent) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handler that takes far longer than the poll interval
struct Slow {
    hits: AtomicUsize,
}

#[async_trait]
impl EdgeHandler for Slow {
    async fn on_edge(&self, _event: EdgeEvent) {
        tokio::time::sleep(Duration::from_secs(10)).await;
        self.hits.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn test_initial_level_does_not_fire() {
    let (sim, ctx) = context();
    sim.set_input(3, true);

    let mut monitor = InterlockMonitor::new(&ctx);
    let mut rising = monitor.subscribe(3, true);
    let handle = monitor.spawn();

    settle().await;
    assert!(rising.try_recv().is_none());

    ctx.flags.alive().latch();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_one_event_per_transition() {
    let (sim, ctx) = context();

    let mut monitor = InterlockMonitor::new(&ctx);
    let mut rising = monitor.subscribe(3, true);
    let mut falling = monitor.subscribe(3, false);
    let handle = monitor.spawn();
    settle().await;

    sim.set_input(3, true);
    // Held high across many samples
    tokio::time::sleep(Duration::from_millis(200)).await;

    let event = rising.try_recv().unwrap();
    assert_eq!(event.line, 3);
    assert_eq!(event.edge(), Edge::Rising);
    assert!(rising.try_recv().is_none());
    assert!(falling.try_recv().is_none());

    sim.set_input(3, false);
    settle().await;

    assert_eq!(falling.try_recv().unwrap().edge(), Edge::Falling);
    assert!(rising.try_recv().is_none());

    ctx.flags.alive().latch();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_handlers_match_line_and_level() {
    let (sim, ctx) = context();
    let reset = Arc::new(Counter::default());
    let pause = Arc::new(Counter::default());

    let mut monitor = InterlockMonitor::new(&ctx);
    monitor.on_edge(2, true, reset.clone());
    monitor.on_edge(3, true, pause.clone());
    assert_eq!(monitor.monitored_lines(), vec![2, 3]);
    let handle = monitor.spawn();
    settle().await;

    for _ in 0..3 {
        sim.set_input(2, true);
        settle().await;
        sim.set_input(2, false);
        settle().await;
    }

    assert_eq!(reset.hits.load(Ordering::SeqCst), 3);
    assert_eq!(pause.hits.load(Ordering::SeqCst), 0);

    ctx.flags.alive().latch();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_handler_does_not_delay_detection() {
    let (sim, ctx) = context();
    let slow = Arc::new(Slow {
        hits: AtomicUsize::new(0),
    });

    let mut monitor = InterlockMonitor::new(&ctx);
    monitor.on_edge(2, true, slow.clone());
    let mut stream = monitor.subscribe(2, true);
    let handle = monitor.spawn();
    settle().await;

    sim.set_input(2, true);
    settle().await;
    sim.set_input(2, false);
    settle().await;
    sim.set_input(2, true);
    settle().await;

    // Both edges reached the stream while the first handler still sleeps
    assert!(stream.try_recv().is_some());
    assert!(stream.try_recv().is_some());
    assert_eq!(slow.hits.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(slow.hits.load(Ordering::SeqCst), 2);

    ctx.flags.alive().latch();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_stream_closes_when_halted() {
    let (_sim, ctx) = context();

    let mut monitor = InterlockMonitor::new(&ctx);
    let mut stream = monitor.subscribe(3, true);
    let handle = monitor.spawn();

    ctx.flags.alive().latch();
    handle.join().await;

    assert!(stream.recv().await.is_none());
}
