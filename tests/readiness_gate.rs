//! Readiness Gate Integration Tests
//!
//! Heartbeat pattern while waiting, settle delay, and prompt interruption.

use std::sync::Arc;
use std::time::Duration;

use cinchseal::adapters::SimulatedController;
use cinchseal::core::{CellContext, FaultMonitor, GateOutcome, ReadinessGate, Timing};
use cinchseal::domain::LineMap;
use tokio::time::Instant;

const SENSE: u8 = 1;
const INDICATOR: u8 = 8;

fn gate() -> (Arc<SimulatedController>, Arc<ReadinessGate>, CellContext) {
    let sim = Arc::new(SimulatedController::new());
    let ctx = CellContext::new(sim.clone(), LineMap::default(), Timing::default());
    let fault = Arc::new(FaultMonitor::new(&ctx));
    let gate = Arc::new(ReadinessGate::new(&ctx, fault));
    (sim, gate, ctx)
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_until_ready() {
    let (sim, gate, _ctx) = gate();

    let started = Instant::now();
    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.wait_until_ready(SENSE, INDICATOR, None).await })
    };

    tokio::time::sleep(Duration::from_millis(2200)).await;
    sim.set_input(SENSE, true);

    assert_eq!(waiter.await.unwrap(), GateOutcome::Ready);
    assert!(started.elapsed() >= Duration::from_millis(2200));

    // On/off pulses at half the period each, ending with the indicator on
    let writes = sim.writes_to(INDICATOR);
    assert_eq!(writes, vec![true, false, true, false, true, false, true]);
    assert!(sim.output(INDICATOR));
}

#[tokio::test(start_paused = true)]
async fn test_settle_applies_after_ready() {
    let (sim, gate, _ctx) = gate();
    sim.set_input(SENSE, true);

    let started = Instant::now();
    let outcome = gate
        .wait_until_ready(SENSE, INDICATOR, Some(Duration::from_millis(300)))
        .await;

    assert_eq!(outcome, GateOutcome::Ready);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_latch_interrupts_within_one_poll() {
    let (_sim, gate, ctx) = gate();

    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.wait_until_ready(SENSE, INDICATOR, None).await })
    };
    tokio::time::sleep(Duration::from_millis(730)).await;

    let latched_at = Instant::now();
    ctx.flags.alive().latch();

    assert_eq!(waiter.await.unwrap(), GateOutcome::Halted);
    assert!(latched_at.elapsed() <= Timing::default().gate_poll);
}

#[tokio::test(start_paused = true)]
async fn test_abort_interrupts_within_one_poll() {
    let (_sim, gate, ctx) = gate();

    let waiter = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.wait_until_ready(SENSE, INDICATOR, None).await })
    };
    tokio::time::sleep(Duration::from_millis(1330)).await;

    let requested_at = Instant::now();
    ctx.flags.request_abort();

    assert_eq!(waiter.await.unwrap(), GateOutcome::Aborted);
    assert!(requested_at.elapsed() <= Timing::default().gate_poll);
}
