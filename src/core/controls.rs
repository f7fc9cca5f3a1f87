//! Operator controls driven by interlock edges: pause/resume and reset.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::DigitalIo;
use crate::domain::{Edge, EdgeEvent, LineNumber};

use super::context::CellContext;
use super::flags::ControlFlags;
use super::interlock::{EdgeHandler, InterlockMonitor};

/// Rising edge on the pause line pauses, falling edge resumes.
///
/// The executor only looks at the flag between steps, so a pause never
/// truncates a move in progress.
pub struct PauseResumeController {
    flags: Arc<ControlFlags>,
}

impl PauseResumeController {
    pub fn new(ctx: &CellContext) -> Self {
        Self {
            flags: ctx.flags.clone(),
        }
    }

    /// Register for both edges of `line`
    pub fn attach(self: Arc<Self>, monitor: &mut InterlockMonitor, line: LineNumber) {
        monitor.on_edge(line, true, self.clone());
        monitor.on_edge(line, false, self);
    }
}

#[async_trait]
impl EdgeHandler for PauseResumeController {
    async fn on_edge(&self, event: EdgeEvent) {
        let paused = event.level;
        let was = self.flags.set_paused(paused);
        if was != paused {
            match event.edge() {
                Edge::Rising => info!(line = event.line, "pause requested"),
                Edge::Falling => info!(line = event.line, "resume requested"),
            }
        }
    }
}

/// Rising edge on the reset line aborts the current pass.
///
/// The indicator is driven off straight away; the executor performs the
/// safe move when it next checks the abort flag.
pub struct ResetController {
    io: Arc<dyn DigitalIo>,
    flags: Arc<ControlFlags>,
    indicator: LineNumber,
}

impl ResetController {
    pub fn new(ctx: &CellContext) -> Self {
        Self {
            io: ctx.io.clone(),
            flags: ctx.flags.clone(),
            indicator: ctx.lines.indicator,
        }
    }

    pub fn attach(self: Arc<Self>, monitor: &mut InterlockMonitor, line: LineNumber) {
        monitor.on_edge(line, true, self);
    }
}

#[async_trait]
impl EdgeHandler for ResetController {
    async fn on_edge(&self, event: EdgeEvent) {
        if !self.flags.is_alive() {
            return;
        }
        info!(line = event.line, "reset requested");
        self.flags.request_abort();

        if let Err(e) = self.io.write_digital(self.indicator, false).await {
            warn!(error = %e, "could not drive indicator off on reset");
        }
    }
}
