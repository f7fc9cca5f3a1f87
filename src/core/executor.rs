//! Sequence executor: drives the arm through the plan one step at a time.
//!
//! A pass runs Idle → WaitingForStart → Running → Idle. Between steps the
//! executor looks at three flags, in this order:
//! - AliveFlag: latched means Faulted, terminal for the process
//! - Abort: the reset line fired; park the arm and restart at step 0
//! - Pause: idle in place until it clears, cursor untouched
//!
//! Steps themselves are never interrupted. A fault that latches during a
//! move lets the call return and then stops before the next one.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::MotionController;
use crate::domain::{Motion, SafeMove, SequencePlan};

use super::context::CellContext;
use super::fault::{Fault, FaultMonitor};
use super::flags::ControlFlags;
use super::gate::{GateOutcome, ReadinessGate};

/// Executor state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Idle,
    WaitingForStart,
    Running,
    Paused,
    Aborting,
    Faulted,
}

impl std::fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::WaitingForStart => "waiting_for_start",
            ExecutorState::Running => "running",
            ExecutorState::Paused => "paused",
            ExecutorState::Aborting => "aborting",
            ExecutorState::Faulted => "faulted",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot published after every state or cursor change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutorStatus {
    pub state: ExecutorState,
    pub cursor: usize,
    pub passes_completed: u64,
    pub aborts: u64,
}

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Aborted,
    Faulted(Fault),
}

/// Totals for a multi-pass run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub passes_completed: u64,
    pub aborts: u64,

    /// Why the run stopped, if it did not reach the pass limit
    pub fault: Option<Fault>,
}

enum Boundary {
    Continue,
    Abort,
    Halt,
}

pub struct SequenceExecutor {
    plan: Arc<SequencePlan>,
    ctx: CellContext,
    fault: Arc<FaultMonitor>,
    gate: ReadinessGate,
    state: ExecutorState,
    cursor: usize,
    passes_completed: u64,
    aborts: u64,
    status: watch::Sender<ExecutorStatus>,
}

impl SequenceExecutor {
    pub fn new(plan: SequencePlan, ctx: CellContext, fault: Arc<FaultMonitor>) -> Self {
        let initial = ExecutorStatus {
            state: ExecutorState::Idle,
            cursor: 0,
            passes_completed: 0,
            aborts: 0,
        };
        let (status, _) = watch::channel(initial);
        let gate = ReadinessGate::new(&ctx, fault.clone());

        Self {
            plan: Arc::new(plan),
            ctx,
            fault,
            gate,
            state: ExecutorState::Idle,
            cursor: 0,
            passes_completed: 0,
            aborts: 0,
            status,
        }
    }

    pub fn plan(&self) -> &SequencePlan {
        &self.plan
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn status(&self) -> ExecutorStatus {
        *self.status.borrow()
    }

    /// Receiver that sees every published status change
    pub fn subscribe(&self) -> watch::Receiver<ExecutorStatus> {
        self.status.subscribe()
    }

    /// Latch the AliveFlag; the running pass stops at its next check
    pub fn shutdown(&self) -> bool {
        self.fault.shutdown()
    }

    /// Run passes until a fault, or until `max_passes` passes have completed
    pub async fn run(&mut self, max_passes: Option<u64>) -> RunSummary {
        let mut fault = None;

        loop {
            if max_passes.is_some_and(|max| self.passes_completed >= max) {
                break;
            }
            match self.run_pass().await {
                PassOutcome::Completed | PassOutcome::Aborted => {}
                PassOutcome::Faulted(f) => {
                    fault = Some(f);
                    break;
                }
            }
        }

        RunSummary {
            passes_completed: self.passes_completed,
            aborts: self.aborts,
            fault,
        }
    }

    /// One full cycle: home, wait for start, every step, back to Idle
    #[instrument(skip(self), fields(plan = %self.plan.name(), pass = self.passes_completed + 1))]
    pub async fn run_pass(&mut self) -> PassOutcome {
        self.set_state(ExecutorState::Idle);

        // A reset left pending by the previous pass parks before homing
        if self.ctx.flags.abort_requested() {
            return self.abort().await;
        }
        if let Err(fault) = self.write_indicator(false).await {
            return self.faulted(fault).await;
        }
        if let Err(fault) = self.home().await {
            return self.faulted(fault).await;
        }

        self.set_state(ExecutorState::WaitingForStart);
        let lines = self.ctx.lines;
        match self
            .gate
            .wait_until_ready(lines.start, lines.indicator, None)
            .await
        {
            GateOutcome::Ready => {}
            GateOutcome::Aborted => return self.abort().await,
            GateOutcome::Halted => return self.faulted(self.fault.current()).await,
        }

        self.set_state(ExecutorState::Running);
        info!(steps = self.plan.len(), start = self.cursor, "pass started");

        while self.cursor < self.plan.len() {
            match self.boundary().await {
                Boundary::Continue => {}
                Boundary::Abort => return self.abort().await,
                Boundary::Halt => return self.faulted(self.fault.current()).await,
            }

            match self
                .gate
                .wait_until_ready(lines.ready, lines.indicator, Some(self.ctx.timing.settle))
                .await
            {
                GateOutcome::Ready => {}
                GateOutcome::Aborted => return self.abort().await,
                GateOutcome::Halted => return self.faulted(self.fault.current()).await,
            }

            // Pause or reset raised during the gate: back to the boundary,
            // then wait for readiness again
            if self.interrupted() {
                continue;
            }

            if let Err(fault) = self.execute_step(self.cursor).await {
                return self.faulted(fault).await;
            }
            self.cursor += 1;
            self.publish();
        }

        if !self.ctx.flags.is_alive() {
            return self.faulted(self.fault.current()).await;
        }
        if self.ctx.flags.abort_requested() {
            return self.abort().await;
        }

        self.cursor = 0;
        self.passes_completed += 1;
        if let Err(fault) = self.write_indicator(false).await {
            return self.faulted(fault).await;
        }
        self.set_state(ExecutorState::Idle);
        info!(passes = self.passes_completed, "pass complete");

        PassOutcome::Completed
    }

    fn interrupted(&self) -> bool {
        let flags = &self.ctx.flags;
        !flags.is_alive() || flags.abort_requested() || flags.is_paused()
    }

    /// Step-boundary checks. Reset wins over pause.
    async fn boundary(&mut self) -> Boundary {
        loop {
            if !self.ctx.flags.is_alive() {
                return Boundary::Halt;
            }
            if self.ctx.flags.abort_requested() {
                return Boundary::Abort;
            }
            if !self.ctx.flags.is_paused() {
                if self.state == ExecutorState::Paused {
                    info!(cursor = self.cursor, "resumed");
                    self.set_state(ExecutorState::Running);
                }
                return Boundary::Continue;
            }

            if self.state != ExecutorState::Paused {
                info!(cursor = self.cursor, "paused");
                self.set_state(ExecutorState::Paused);
            }
            let flags: &ControlFlags = &self.ctx.flags;
            tokio::select! {
                _ = tokio::time::sleep(self.ctx.timing.gate_poll) => {}
                _ = flags.alive().halted() => {}
            }
        }
    }

    async fn execute_step(&self, index: usize) -> Result<(), Fault> {
        let plan = self.plan.clone();
        let step = &plan.steps()[index];
        let name = step.describe(index);

        if !self.ctx.flags.is_alive() {
            return Err(self.fault.current());
        }
        debug!(step = %name, "executing step");

        let motion: &dyn MotionController = self.ctx.motion.as_ref();
        let (call, result) = match &step.motion {
            Motion::MoveTo { pose } => (
                "move_to",
                motion.move_to(pose, step.speed, step.accel, step.wait).await,
            ),
            Motion::ArcThrough { via, to, percent } => (
                "arc_through",
                motion
                    .arc_through(via, to, *percent, step.speed, step.accel, step.wait)
                    .await,
            ),
        };
        self.fault
            .check(result, &format!("{} step {}", call, name))
            .await?;

        let dwell = step.dwell();
        if !dwell.is_zero() {
            self.dwell(dwell).await?;
        }
        Ok(())
    }

    async fn dwell(&self, duration: Duration) -> Result<(), Fault> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.ctx.flags.alive().halted() => Err(self.fault.current()),
        }
    }

    async fn home(&self) -> Result<(), Fault> {
        if !self.ctx.flags.is_alive() {
            return Err(self.fault.current());
        }
        let result = self
            .ctx
            .motion
            .move_to(
                &self.plan.home(),
                self.plan.home_speed(),
                self.plan.home_accel(),
                true,
            )
            .await;
        self.fault.check(result, "move_to home").await
    }

    async fn write_indicator(&self, level: bool) -> Result<(), Fault> {
        if !self.ctx.flags.is_alive() {
            return Err(self.fault.current());
        }
        let result = self.ctx.io.write_digital(self.ctx.lines.indicator, level).await;
        self.fault.check(result, "write_digital").await
    }

    /// Reset handling: indicator off, park the arm, cursor back to 0
    async fn abort(&mut self) -> PassOutcome {
        self.ctx.flags.take_abort();
        warn!(cursor = self.cursor, "reset, aborting pass");
        self.aborts += 1;
        self.set_state(ExecutorState::Aborting);

        if let Err(fault) = self.write_indicator(false).await {
            return self.faulted(fault).await;
        }
        if let Err(fault) = self.safe_move().await {
            return self.faulted(fault).await;
        }

        self.cursor = 0;
        self.set_state(ExecutorState::Idle);
        PassOutcome::Aborted
    }

    async fn safe_move(&self) -> Result<(), Fault> {
        if !self.ctx.flags.is_alive() {
            return Err(self.fault.current());
        }
        let motion = &self.ctx.motion;

        match self.plan.safe_move() {
            SafeMove::Joints {
                angles,
                speed,
                accel,
            } => {
                info!(%angles, "moving to safe joints");
                let result = motion.move_joints(angles, *speed, *accel, true).await;
                self.fault.check(result, "move_joints safe").await
            }
            SafeMove::Path {
                poses,
                speed,
                accel,
            } => {
                info!(waypoints = poses.len(), "sweeping safe path");
                for (i, pose) in poses.iter().enumerate() {
                    let last = i + 1 == poses.len();
                    let result = motion.move_to(pose, *speed, *accel, last).await;
                    self.fault.check(result, "move_to safe").await?;
                }
                Ok(())
            }
        }
    }

    /// Terminal state. The indicator is driven off if the controller still
    /// accepts writes; no further motion is issued.
    async fn faulted(&mut self, fault: Fault) -> PassOutcome {
        self.fault.latch(fault);
        let fault = self.fault.current();
        self.set_state(ExecutorState::Faulted);

        if let Err(e) = self
            .ctx
            .io
            .write_digital(self.ctx.lines.indicator, false)
            .await
        {
            debug!(error = %e, "indicator not cleared after fault");
        }

        match fault {
            Fault::Shutdown => info!(cursor = self.cursor, "sequence stopped"),
            ref other => error!(cursor = self.cursor, fault = %other, "sequence halted"),
        }
        PassOutcome::Faulted(fault)
    }

    fn set_state(&mut self, state: ExecutorState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state change");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(ExecutorStatus {
            state: self.state,
            cursor: self.cursor,
            passes_completed: self.passes_completed,
            aborts: self.aborts,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MotionRecord, SimulatedController};
    use crate::core::context::Timing;
    use crate::domain::{LineMap, MotionStep, Pose};

    fn pose(x: f64) -> Pose {
        Pose::new(x, 100.0, 400.0, 180.0, 0.0, 0.0)
    }

    fn executor(steps: Vec<MotionStep>) -> (Arc<SimulatedController>, SequenceExecutor) {
        let sim = Arc::new(SimulatedController::new());
        let ctx = CellContext::new(sim.clone(), LineMap::default(), Timing::default());
        let fault = Arc::new(FaultMonitor::new(&ctx));
        let plan = SequencePlan::new("test", steps).unwrap();
        (sim, SequenceExecutor::new(plan, ctx, fault))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_runs_every_step_in_order() {
        let (sim, mut exec) = executor(vec![
            MotionStep::move_to(pose(1.0), 100.0, 500.0),
            MotionStep::move_to(pose(2.0), 100.0, 500.0),
        ]);
        sim.set_input(0, true);
        sim.set_input(1, true);

        assert_eq!(exec.run_pass().await, PassOutcome::Completed);

        let targets: Vec<Pose> = sim.motions().iter().filter_map(MotionRecord::pose).collect();
        assert_eq!(targets[1..], [pose(1.0), pose(2.0)]);
        assert_eq!(exec.cursor(), 0);
        assert_eq!(exec.state(), ExecutorState::Idle);
        assert_eq!(exec.status().passes_completed, 1);
        assert!(!sim.output(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latched_flag_issues_no_motion() {
        let (sim, mut exec) = executor(vec![MotionStep::move_to(pose(1.0), 100.0, 500.0)]);
        exec.shutdown();

        assert_eq!(exec.run_pass().await, PassOutcome::Faulted(Fault::Shutdown));
        assert_eq!(sim.motion_count(), 0);
        assert_eq!(exec.state(), ExecutorState::Faulted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_reset_parks_before_homing() {
        let (sim, mut exec) = executor(vec![MotionStep::move_to(pose(1.0), 100.0, 500.0)]);
        exec.ctx.flags.request_abort();

        assert_eq!(exec.run_pass().await, PassOutcome::Aborted);

        // No home move; straight to the safe pose
        let motions = sim.motions();
        assert_eq!(motions.len(), 1);
        assert!(motions[0].is_joint_move());
        assert!(!exec.ctx.flags.abort_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_follows_step() {
        let (sim, mut exec) = executor(vec![MotionStep::move_to(pose(1.0), 100.0, 500.0)
            .non_blocking()
            .with_dwell(1000)]);
        sim.set_input(0, true);
        sim.set_input(1, true);

        let started = tokio::time::Instant::now();
        assert_eq!(exec.run_pass().await, PassOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_pass_limit() {
        let (sim, mut exec) = executor(vec![MotionStep::move_to(pose(1.0), 100.0, 500.0)]);
        sim.set_input(0, true);
        sim.set_input(1, true);

        let summary = exec.run(Some(3)).await;
        assert_eq!(summary.passes_completed, 3);
        assert_eq!(summary.fault, None);
        // Home plus one step per pass
        assert_eq!(sim.motion_count(), 6);
    }
}
