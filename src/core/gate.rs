//! Readiness gate: wait for a sense line with a heartbeat on the indicator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::adapters::DigitalIo;
use crate::domain::LineNumber;

use super::context::CellContext;
use super::fault::FaultMonitor;
use super::flags::ControlFlags;

/// How a gate wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Sense line asserted; indicator left on
    Ready,

    /// Reset requested while waiting
    Aborted,

    /// AliveFlag latched while waiting
    Halted,
}

/// Blocks until a readiness line asserts.
///
/// While waiting the indicator pulses on for half the heartbeat period and
/// off for the other half. Every wait is cut into `gate_poll` slices so a
/// latched fault or a reset ends the wait within one slice.
pub struct ReadinessGate {
    io: Arc<dyn DigitalIo>,
    flags: Arc<ControlFlags>,
    fault: Arc<FaultMonitor>,
    heartbeat_period: Duration,
    poll: Duration,
}

impl ReadinessGate {
    pub fn new(ctx: &CellContext, fault: Arc<FaultMonitor>) -> Self {
        Self {
            io: ctx.io.clone(),
            flags: ctx.flags.clone(),
            fault,
            heartbeat_period: ctx.timing.heartbeat_period,
            poll: ctx.timing.gate_poll,
        }
    }

    /// Wait for `sense`, then hold `settle` (if any) before returning `Ready`
    #[instrument(skip(self))]
    pub async fn wait_until_ready(
        &self,
        sense: LineNumber,
        indicator: LineNumber,
        settle: Option<Duration>,
    ) -> GateOutcome {
        let half = self.heartbeat_period / 2;
        let mut pulses: u64 = 0;

        loop {
            if let Some(outcome) = self.interrupted() {
                return outcome;
            }

            let level = match self.io.read_digital(sense).await {
                Ok(level) => level,
                Err(e) => {
                    let _ = self.fault.check(Err(e), "read_digital").await;
                    return GateOutcome::Halted;
                }
            };
            if level {
                break;
            }

            if pulses == 0 {
                debug!("waiting for readiness");
            }
            pulses += 1;

            if !self.write(indicator, true).await {
                return GateOutcome::Halted;
            }
            if let Some(outcome) = self.hold(half).await {
                return outcome;
            }
            if !self.write(indicator, false).await {
                return GateOutcome::Halted;
            }
            if let Some(outcome) = self.hold(half).await {
                return outcome;
            }
        }

        if !self.write(indicator, true).await {
            return GateOutcome::Halted;
        }
        debug!(pulses, "readiness asserted");

        if let Some(settle) = settle {
            if let Some(outcome) = self.hold(settle).await {
                return outcome;
            }
        }
        GateOutcome::Ready
    }

    fn interrupted(&self) -> Option<GateOutcome> {
        if !self.flags.is_alive() {
            Some(GateOutcome::Halted)
        } else if self.flags.abort_requested() {
            Some(GateOutcome::Aborted)
        } else {
            None
        }
    }

    /// Sleep for `duration` in poll-sized slices
    async fn hold(&self, duration: Duration) -> Option<GateOutcome> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            let slice = remaining.min(self.poll);
            tokio::select! {
                _ = tokio::time::sleep(slice) => {}
                _ = self.flags.alive().halted() => return Some(GateOutcome::Halted),
            }
            remaining -= slice;

            if let Some(outcome) = self.interrupted() {
                return Some(outcome);
            }
        }
        None
    }

    async fn write(&self, line: LineNumber, level: bool) -> bool {
        let result = self.io.write_digital(line, level).await;
        self.fault.check(result, "write_digital").await.is_ok()
    }
}
