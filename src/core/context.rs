//! Shared handle passed to every component of the cell.

use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{DigitalIo, MotionController};
use crate::domain::LineMap;

use super::flags::ControlFlags;

/// Polling and wait intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Interlock sampling interval
    pub interlock_poll: Duration,

    /// Slice length for every cooperative wait (gate, pause, dwell)
    pub gate_poll: Duration,

    /// Full on+off period of the waiting heartbeat
    pub heartbeat_period: Duration,

    /// Delay after the per-step readiness line asserts
    pub settle: Duration,

    /// Capacity of the edge event queue
    pub edge_queue_capacity: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            interlock_poll: Duration::from_millis(10),
            gate_poll: Duration::from_millis(100),
            heartbeat_period: Duration::from_millis(1000),
            settle: Duration::from_millis(100),
            edge_queue_capacity: 64,
        }
    }
}

/// Controller handles, flags and configuration for one session
#[derive(Clone)]
pub struct CellContext {
    pub io: Arc<dyn DigitalIo>,
    pub motion: Arc<dyn MotionController>,
    pub flags: Arc<ControlFlags>,
    pub lines: LineMap,
    pub timing: Timing,
}

impl CellContext {
    /// Build a context around a controller that provides both seams
    pub fn new<C>(controller: Arc<C>, lines: LineMap, timing: Timing) -> Self
    where
        C: DigitalIo + MotionController + 'static,
    {
        Self {
            io: controller.clone(),
            motion: controller,
            flags: Arc::new(ControlFlags::new()),
            lines,
            timing,
        }
    }
}
