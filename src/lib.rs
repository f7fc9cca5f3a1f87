//! cinchseal - Interlocked motion sequencing for a pin-wiping arm cell
//!
//! Drives an arm through a fixed, ordered plan of positioning and circular
//! wipe motions. Every step is gated on a readiness line; an operator can
//! pause, resume or reset the cell through digital inputs; any controller
//! fault halts the cell for the rest of the process.
//!
//! # Architecture
//!
//! Three tasks cooperate through shared flags and a bounded edge queue:
//! - The interlock poller samples input lines and emits edge events
//! - The dispatcher hands edges to the pause/resume and reset controls
//! - The executor is the only caller of motion commands
//!
//! The fault monitor latches a process-wide AliveFlag that every loop checks.
//!
//! # Modules
//!
//! - `adapters`: Controller interfaces and the simulated controller
//! - `core`: Flags, fault monitor, interlocks, readiness gate, executor
//! - `domain`: Data structures (Pose, MotionStep, SequencePlan, LineMap)
//! - `config`: Config file discovery and resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Check a plan
//! cinchseal validate --plan plans/cinchseal.yaml
//!
//! # Dry run two passes against the simulator
//! cinchseal run --simulate --passes 2
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{ControllerError, DigitalIo, MotionController, SimulatedController};
pub use crate::core::{Cell, ExecutorState, Fault, PassOutcome, SequenceExecutor};
pub use domain::{LineMap, MotionStep, Pose, SequencePlan};
