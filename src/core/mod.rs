//! Sequencing engine.
//!
//! This module contains:
//! - Flags: AliveFlag latch, pause and abort flags
//! - Fault: Fault monitor and per-call controller checks
//! - Interlock: Edge detection over digital inputs
//! - Controls: Pause/resume and reset handlers
//! - Gate: Readiness wait with heartbeat
//! - Executor: The step state machine
//! - Cell: Everything wired together for one session

pub mod cell;
pub mod context;
pub mod controls;
pub mod executor;
pub mod fault;
pub mod flags;
pub mod gate;
pub mod interlock;

// Re-export commonly used types
pub use cell::Cell;
pub use context::{CellContext, Timing};
pub use controls::{PauseResumeController, ResetController};
pub use executor::{ExecutorState, ExecutorStatus, PassOutcome, RunSummary, SequenceExecutor};
pub use fault::{Fault, FaultMonitor};
pub use flags::{AliveFlag, ControlFlags};
pub use gate::{GateOutcome, ReadinessGate};
pub use interlock::{EdgeHandler, EdgeStream, InterlockHandle, InterlockMonitor};
