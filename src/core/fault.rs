//! Fault monitor: latches the AliveFlag on controller faults.
//!
//! Two paths lead here:
//! - Asynchronous notifications (error codes, terminal state) pushed by the
//!   controller to the subscription taken in [`FaultMonitor::register`]
//! - Synchronous checks after every controller call ([`FaultMonitor::check`])
//!
//! Whichever path latches first records the fault; everything after is a no-op.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{
    ControllerError, ControllerNotification, ControllerStatus, ListenerId, MotionController,
};

use super::context::CellContext;
use super::flags::ControlFlags;

/// How many times a transitional state is resampled
const TRANSITIONAL_RETRIES: u32 = 5;
const TRANSITIONAL_INTERVAL: Duration = Duration::from_millis(100);

/// Why the cell stopped. Latched faults are terminal for the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("{label} failed with controller code {code}")]
    Transport { label: String, code: i32 },

    #[error("Controller reported unhealthy after {label} ({status})")]
    Unhealthy {
        label: String,
        status: ControllerStatus,
    },

    #[error("Controller error code {0}")]
    ControllerError(i32),

    #[error("Controller entered terminal state {0}")]
    TerminalState(u8),

    #[error("Shutdown requested")]
    Shutdown,
}

/// Watches controller health and owns the AliveFlag latch
pub struct FaultMonitor {
    motion: Arc<dyn MotionController>,
    flags: Arc<ControlFlags>,
    listener: Mutex<Option<ListenerId>>,
    fault: Mutex<Option<Fault>>,
}

impl FaultMonitor {
    pub fn new(ctx: &CellContext) -> Self {
        Self {
            motion: ctx.motion.clone(),
            flags: ctx.flags.clone(),
            listener: Mutex::new(None),
            fault: Mutex::new(None),
        }
    }

    /// Subscribe to controller notifications and spawn the listener task.
    ///
    /// The task ends when a fault latches (from any source).
    pub fn register(self: &Arc<Self>) -> JoinHandle<()> {
        let (id, mut rx) = self.motion.subscribe();
        *self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        let monitor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = rx.recv() => match notification {
                        Some(notification) => {
                            monitor.handle(notification);
                            if !monitor.flags.is_alive() {
                                break;
                            }
                        }
                        None => {
                            warn!("controller closed the notification channel");
                            break;
                        }
                    },
                    _ = monitor.flags.alive().halted() => break,
                }
            }
            monitor.release();
        })
    }

    /// Process one notification. Returns true if it latched a fault.
    pub fn handle(&self, notification: ControllerNotification) -> bool {
        match notification {
            ControllerNotification::ErrorWarn { error_code, .. } if error_code != 0 => {
                self.latch(Fault::ControllerError(error_code))
            }
            ControllerNotification::ErrorWarn { warn_code, .. } => {
                if warn_code != 0 && self.flags.is_alive() {
                    warn!(warn_code, "controller warning");
                }
                false
            }
            ControllerNotification::State(state) if ControllerStatus::is_terminal_state(state) => {
                self.latch(Fault::TerminalState(state))
            }
            ControllerNotification::State(_) => false,
            ControllerNotification::Count(count) => {
                if self.flags.is_alive() {
                    info!(count, "counter changed");
                }
                false
            }
        }
    }

    /// Latch the AliveFlag with `fault` as the reason.
    ///
    /// Returns true only for the call that latched; the subscription is
    /// released at the same time.
    pub fn latch(&self, fault: Fault) -> bool {
        if !self.flags.alive().latch() {
            return false;
        }

        match &fault {
            Fault::Shutdown => info!("shutdown requested, halting cell"),
            other => error!(fault = %other, "fault latched, halting cell"),
        }
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
        self.release();
        true
    }

    /// Explicit shutdown
    pub fn shutdown(&self) -> bool {
        self.latch(Fault::Shutdown)
    }

    /// Release the notification subscription if still held
    pub fn release(&self) {
        let id = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.motion.unsubscribe(id);
        }
    }

    /// The fault that latched the flag; `Shutdown` if none was recorded
    pub fn current(&self) -> Fault {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(Fault::Shutdown)
    }

    pub fn is_latched(&self) -> bool {
        !self.flags.is_alive()
    }

    /// Full liveness check: flag set, controller connected, no error code,
    /// state below stopped. A transitional state is resampled a few times
    /// before being judged.
    pub async fn is_alive(&self) -> bool {
        if !self.flags.is_alive() {
            return false;
        }

        let mut status = self.motion.status();
        let mut retries = 0;
        while status.state == ControllerStatus::STATE_TRANSITIONAL && retries < TRANSITIONAL_RETRIES
        {
            retries += 1;
            tokio::time::sleep(TRANSITIONAL_INTERVAL).await;
            status = self.motion.status();
        }

        self.flags.is_alive() && status.is_healthy()
    }

    /// Guard applied after every controller call.
    ///
    /// A failed call or an unhealthy controller latches a fault. Returns the
    /// latched fault, which may predate this call.
    pub async fn check(&self, result: Result<(), ControllerError>, label: &str) -> Result<(), Fault> {
        let alive = self.is_alive().await;
        if alive && result.is_ok() {
            return Ok(());
        }

        let status = self.motion.status();
        let fault = match &result {
            Err(e) => Fault::Transport {
                label: label.to_string(),
                code: e.code(),
            },
            Ok(()) => Fault::Unhealthy {
                label: label.to_string(),
                status,
            },
        };

        if self.flags.is_alive() {
            error!(
                label,
                code = result.as_ref().err().map(|e| e.code()).unwrap_or(0),
                connected = status.connected,
                state = status.state,
                error_code = status.error_code,
                "controller check failed"
            );
        }
        self.latch(fault);
        Err(self.current())
    }
}
