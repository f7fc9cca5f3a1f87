//! Domain types for the cell.
//!
//! This module contains the core data structures:
//! - Pose: Cartesian and joint targets
//! - Plan: Motion steps and the sequence plan
//! - Lines: Digital line roles and edge events

pub mod lines;
pub mod plan;
pub mod pose;

// Re-export commonly used types
pub use lines::{DigitalLine, Edge, EdgeEvent, LineConflict, LineMap, LineNumber, LineRole};
pub use plan::{Motion, MotionStep, PlanError, PlanFile, SafeMove, SequencePlan, StepSpec};
pub use pose::{circle_poses, JointAngles, Pose};
