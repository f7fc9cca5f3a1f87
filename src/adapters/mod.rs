//! Controller interfaces.
//!
//! The arm controller is an external collaborator. The cell talks to it
//! through two seams:
//! - `DigitalIo`: read/write of digital lines
//! - `MotionController`: motion commands, status, and fault notifications
//!
//! Transport (network or bus) lives behind these traits.

pub mod simulated;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{JointAngles, LineNumber, Pose};

// Re-export the simulated controller
pub use simulated::{MotionRecord, SimulatedController};

/// Errors reported by the controller for a single call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("Controller returned code {0}")]
    Code(i32),

    #[error("Controller is not connected")]
    Disconnected,
}

impl ControllerError {
    /// Numeric code for logs; connection loss is reported as -1
    pub fn code(&self) -> i32 {
        match self {
            ControllerError::Code(code) => *code,
            ControllerError::Disconnected => -1,
        }
    }
}

/// Asynchronous report pushed by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerNotification {
    /// Error/warning codes changed
    ErrorWarn { error_code: i32, warn_code: i32 },

    /// Controller state changed
    State(u8),

    /// Program counter changed
    Count(u32),
}

/// Point-in-time controller health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus {
    pub connected: bool,
    pub error_code: i32,
    pub state: u8,
}

impl ControllerStatus {
    /// Motion stopped; the controller will not accept further moves
    pub const STATE_STOPPED: u8 = 4;

    /// Transitional state; resample before judging
    pub const STATE_TRANSITIONAL: u8 = 5;

    /// Connected, ready controller
    pub fn ready() -> Self {
        Self {
            connected: true,
            error_code: 0,
            state: 0,
        }
    }

    /// Whether the state is one the cell cannot recover from
    pub fn is_terminal_state(state: u8) -> bool {
        state == Self::STATE_STOPPED
    }

    pub fn is_healthy(&self) -> bool {
        self.connected && self.error_code == 0 && self.state < Self::STATE_STOPPED
    }
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connected={}, state={}, error={}",
            self.connected, self.state, self.error_code
        )
    }
}

/// Handle for a notification subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Digital line access on the controller
#[async_trait]
pub trait DigitalIo: Send + Sync {
    /// Current level of a line
    async fn read_digital(&self, line: LineNumber) -> Result<bool, ControllerError>;

    /// Drive an output line
    async fn write_digital(&self, line: LineNumber, level: bool) -> Result<(), ControllerError>;
}

/// Motion commands and health reporting
#[async_trait]
pub trait MotionController: Send + Sync {
    /// Human-readable controller name
    fn name(&self) -> &str;

    /// Linear TCP move
    async fn move_to(
        &self,
        pose: &Pose,
        speed: f64,
        accel: f64,
        wait: bool,
    ) -> Result<(), ControllerError>;

    /// Circular TCP move through `via` and `to`
    async fn arc_through(
        &self,
        via: &Pose,
        to: &Pose,
        percent: f64,
        speed: f64,
        accel: f64,
        wait: bool,
    ) -> Result<(), ControllerError>;

    /// Joint-space move
    async fn move_joints(
        &self,
        angles: &JointAngles,
        speed: f64,
        accel: f64,
        wait: bool,
    ) -> Result<(), ControllerError>;

    /// Current connection/error/state snapshot
    fn status(&self) -> ControllerStatus;

    /// Start receiving error, state and counter notifications
    fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<ControllerNotification>);

    /// Stop a subscription. Returns false if it was already released.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ControllerError::Code(31).code(), 31);
        assert_eq!(ControllerError::Disconnected.code(), -1);
    }

    #[test]
    fn test_status_health() {
        assert!(ControllerStatus::ready().is_healthy());

        let stopped = ControllerStatus {
            state: ControllerStatus::STATE_STOPPED,
            ..ControllerStatus::ready()
        };
        assert!(!stopped.is_healthy());

        let errored = ControllerStatus {
            error_code: 22,
            ..ControllerStatus::ready()
        };
        assert!(!errored.is_healthy());
    }
}
