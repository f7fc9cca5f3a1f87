//! A wiring of every component around one controller for one session.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{DigitalIo, MotionController};
use crate::domain::{LineConflict, LineMap, SequencePlan};

use super::context::{CellContext, Timing};
use super::controls::{PauseResumeController, ResetController};
use super::executor::{ExecutorStatus, PassOutcome, RunSummary, SequenceExecutor};
use super::fault::FaultMonitor;
use super::flags::ControlFlags;
use super::interlock::{InterlockHandle, InterlockMonitor};

/// Running cell: fault listener, interlock tasks and the executor
pub struct Cell {
    session_id: Uuid,
    ctx: CellContext,
    fault: Arc<FaultMonitor>,
    fault_task: JoinHandle<()>,
    interlocks: InterlockHandle,
    executor: SequenceExecutor,
}

impl Cell {
    /// Register the fault monitor, attach the operator controls and start
    /// the interlock tasks. Must be called inside a tokio runtime.
    pub fn start<C>(
        controller: Arc<C>,
        plan: SequencePlan,
        lines: LineMap,
        timing: Timing,
    ) -> Result<Self, LineConflict>
    where
        C: DigitalIo + MotionController + 'static,
    {
        lines.validate()?;

        let session_id = Uuid::new_v4();
        let ctx = CellContext::new(controller, lines, timing);

        info!(
            session = %session_id,
            controller = ctx.motion.name(),
            plan = plan.name(),
            steps = plan.len(),
            fingerprint = %plan.fingerprint(),
            "cell starting"
        );

        let fault = Arc::new(FaultMonitor::new(&ctx));
        let fault_task = fault.register();

        let mut monitor = InterlockMonitor::new(&ctx);
        Arc::new(PauseResumeController::new(&ctx)).attach(&mut monitor, lines.pause);
        Arc::new(ResetController::new(&ctx)).attach(&mut monitor, lines.reset);
        let interlocks = monitor.spawn();

        let executor = SequenceExecutor::new(plan, ctx.clone(), fault.clone());

        Ok(Self {
            session_id,
            ctx,
            fault,
            fault_task,
            interlocks,
            executor,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn flags(&self) -> Arc<ControlFlags> {
        self.ctx.flags.clone()
    }

    /// Handle for latching a shutdown from another task
    pub fn fault_monitor(&self) -> Arc<FaultMonitor> {
        self.fault.clone()
    }

    pub fn status(&self) -> ExecutorStatus {
        self.executor.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutorStatus> {
        self.executor.subscribe()
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn run_pass(&mut self) -> PassOutcome {
        self.executor.run_pass().await
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    pub async fn run(&mut self, max_passes: Option<u64>) -> RunSummary {
        self.executor.run(max_passes).await
    }

    /// Latch the AliveFlag and wait for the background tasks to wind down
    pub async fn shutdown(self) {
        self.fault.shutdown();

        if let Err(e) = self.fault_task.await {
            warn!(error = %e, "fault listener ended abnormally");
        }
        self.interlocks.join().await;
        info!(session = %self.session_id, "cell stopped");
    }
}
