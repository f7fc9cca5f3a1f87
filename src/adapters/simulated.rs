//! In-process simulated controller.
//!
//! Holds digital line levels in memory, records every motion and write,
//! and can be scripted: input changes tied to the N-th motion call, and
//! injected fault codes. Used for `run --simulate` dry runs and as the
//! test double for the sequencing engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ControllerError, ControllerNotification, ControllerStatus, DigitalIo, ListenerId,
    MotionController,
};
use crate::domain::{JointAngles, LineNumber, Pose};

/// A motion command as received by the simulator
#[derive(Debug, Clone, PartialEq)]
pub enum MotionRecord {
    MoveTo {
        pose: Pose,
        speed: f64,
        accel: f64,
        wait: bool,
    },
    ArcThrough {
        via: Pose,
        to: Pose,
        percent: f64,
        speed: f64,
        accel: f64,
        wait: bool,
    },
    Joints {
        angles: JointAngles,
        speed: f64,
        accel: f64,
        wait: bool,
    },
}

impl MotionRecord {
    pub fn is_joint_move(&self) -> bool {
        matches!(self, MotionRecord::Joints { .. })
    }

    /// Target pose of a linear move
    pub fn pose(&self) -> Option<Pose> {
        match self {
            MotionRecord::MoveTo { pose, .. } => Some(*pose),
            _ => None,
        }
    }
}

/// Input change applied when a given motion call starts
#[derive(Debug, Clone, Copy)]
struct InputTrigger {
    motion_index: usize,
    line: LineNumber,
    level: bool,
}

struct SimState {
    inputs: HashMap<LineNumber, bool>,
    outputs: HashMap<LineNumber, bool>,
    writes: Vec<(LineNumber, bool)>,
    motions: Vec<MotionRecord>,
    triggers: Vec<InputTrigger>,
    failures: HashMap<usize, i32>,
    status: ControllerStatus,
    listeners: HashMap<u64, mpsc::UnboundedSender<ControllerNotification>>,
    unsubscribes: usize,
}

impl SimState {
    fn notify(&mut self, notification: ControllerNotification) {
        self.listeners
            .retain(|_, tx| tx.send(notification).is_ok());
    }

    fn apply(&mut self, notification: ControllerNotification) {
        match notification {
            ControllerNotification::ErrorWarn { error_code, .. } => {
                self.status.error_code = error_code;
            }
            ControllerNotification::State(state) => {
                self.status.state = state;
            }
            ControllerNotification::Count(_) => {}
        }
        self.notify(notification);
    }
}

/// Simulated arm controller
pub struct SimulatedController {
    /// How long a blocking move takes
    motion_time: Duration,

    state: Mutex<SimState>,

    next_listener: AtomicU64,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedController {
    /// Create a simulator whose blocking moves take 50ms
    pub fn new() -> Self {
        Self::with_motion_time(Duration::from_millis(50))
    }

    pub fn with_motion_time(motion_time: Duration) -> Self {
        Self {
            motion_time,
            state: Mutex::new(SimState {
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                writes: Vec::new(),
                motions: Vec::new(),
                triggers: Vec::new(),
                failures: HashMap::new(),
                status: ControllerStatus::ready(),
                listeners: HashMap::new(),
                unsubscribes: 0,
            }),
            next_listener: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the level of an input line
    pub fn set_input(&self, line: LineNumber, level: bool) {
        self.lock().inputs.insert(line, level);
    }

    pub fn input(&self, line: LineNumber) -> bool {
        self.lock().inputs.get(&line).copied().unwrap_or(false)
    }

    /// Last level written to an output line
    pub fn output(&self, line: LineNumber) -> bool {
        self.lock().outputs.get(&line).copied().unwrap_or(false)
    }

    /// Every write, in order
    pub fn writes(&self) -> Vec<(LineNumber, bool)> {
        self.lock().writes.clone()
    }

    /// Writes to one line, in order
    pub fn writes_to(&self, line: LineNumber) -> Vec<bool> {
        self.lock()
            .writes
            .iter()
            .filter(|(l, _)| *l == line)
            .map(|(_, level)| *level)
            .collect()
    }

    /// Every motion command received, in order
    pub fn motions(&self) -> Vec<MotionRecord> {
        self.lock().motions.clone()
    }

    pub fn motion_count(&self) -> usize {
        self.lock().motions.len()
    }

    /// Set `line` to `level` when motion number `motion_index` (0-based) starts
    pub fn on_motion(&self, motion_index: usize, line: LineNumber, level: bool) {
        self.lock().triggers.push(InputTrigger {
            motion_index,
            line,
            level,
        });
    }

    /// Fail motion number `motion_index` with `code`, stopping the controller
    pub fn fail_motion(&self, motion_index: usize, code: i32) {
        self.lock().failures.insert(motion_index, code);
    }

    /// Push a notification to subscribers, updating status to match
    pub fn emit(&self, notification: ControllerNotification) {
        self.lock().apply(notification);
    }

    /// Drop the connection; subsequent calls fail
    pub fn disconnect(&self) {
        self.lock().status.connected = false;
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.lock().unsubscribes
    }

    fn precheck(status: &ControllerStatus) -> Result<(), ControllerError> {
        if !status.connected {
            return Err(ControllerError::Disconnected);
        }
        if status.error_code != 0 {
            return Err(ControllerError::Code(1));
        }
        if status.state >= ControllerStatus::STATE_STOPPED {
            return Err(ControllerError::Code(9));
        }
        Ok(())
    }

    async fn perform(&self, record: MotionRecord, wait: bool) -> Result<(), ControllerError> {
        let outcome = {
            let mut st = self.lock();
            Self::precheck(&st.status)?;

            let index = st.motions.len();
            debug!(index, ?record, "simulated motion");
            st.motions.push(record);

            let fired: Vec<InputTrigger> = st
                .triggers
                .iter()
                .filter(|t| t.motion_index == index)
                .copied()
                .collect();
            for trigger in fired {
                st.inputs.insert(trigger.line, trigger.level);
            }

            match st.failures.remove(&index) {
                Some(code) => {
                    st.apply(ControllerNotification::ErrorWarn {
                        error_code: code,
                        warn_code: 0,
                    });
                    st.apply(ControllerNotification::State(
                        ControllerStatus::STATE_STOPPED,
                    ));
                    Err(ControllerError::Code(code))
                }
                None => Ok(()),
            }
        };

        if outcome.is_ok() && wait {
            tokio::time::sleep(self.motion_time).await;
        }
        outcome
    }
}

#[async_trait]
impl DigitalIo for SimulatedController {
    async fn read_digital(&self, line: LineNumber) -> Result<bool, ControllerError> {
        let st = self.lock();
        if !st.status.connected {
            return Err(ControllerError::Disconnected);
        }
        Ok(st.inputs.get(&line).copied().unwrap_or(false))
    }

    async fn write_digital(&self, line: LineNumber, level: bool) -> Result<(), ControllerError> {
        let mut st = self.lock();
        if !st.status.connected {
            return Err(ControllerError::Disconnected);
        }
        st.outputs.insert(line, level);
        st.writes.push((line, level));
        Ok(())
    }
}

#[async_trait]
impl MotionController for SimulatedController {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn move_to(
        &self,
        pose: &Pose,
        speed: f64,
        accel: f64,
        wait: bool,
    ) -> Result<(), ControllerError> {
        let record = MotionRecord::MoveTo {
            pose: *pose,
            speed,
            accel,
            wait,
        };
        self.perform(record, wait).await
    }

    async fn arc_through(
        &self,
        via: &Pose,
        to: &Pose,
        percent: f64,
        speed: f64,
        accel: f64,
        wait: bool,
    ) -> Result<(), ControllerError> {
        let record = MotionRecord::ArcThrough {
            via: *via,
            to: *to,
            percent,
            speed,
            accel,
            wait,
        };
        self.perform(record, wait).await
    }

    async fn move_joints(
        &self,
        angles: &JointAngles,
        speed: f64,
        accel: f64,
        wait: bool,
    ) -> Result<(), ControllerError> {
        let record = MotionRecord::Joints {
            angles: *angles,
            speed,
            accel,
            wait,
        };
        self.perform(record, wait).await
    }

    fn status(&self) -> ControllerStatus {
        self.lock().status
    }

    fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<ControllerNotification>) {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listeners.insert(id, tx);
        (ListenerId(id), rx)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut st = self.lock();
        let removed = st.listeners.remove(&id.0).is_some();
        if removed {
            st.unsubscribes += 1;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(x: f64) -> Pose {
        Pose::new(x, 0.0, 400.0, 180.0, 0.0, 0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_motions_and_writes() {
        let sim = SimulatedController::new();

        sim.move_to(&pose(1.0), 100.0, 200.0, true).await.unwrap();
        sim.write_digital(8, true).await.unwrap();

        assert_eq!(sim.motion_count(), 1);
        assert_eq!(sim.motions()[0].pose(), Some(pose(1.0)));
        assert!(sim.output(8));
        assert_eq!(sim.writes(), vec![(8, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_fires_on_motion_start() {
        let sim = SimulatedController::new();
        sim.on_motion(1, 3, true);

        sim.move_to(&pose(1.0), 100.0, 200.0, true).await.unwrap();
        assert!(!sim.input(3));

        sim.move_to(&pose(2.0), 100.0, 200.0, false).await.unwrap();
        assert!(sim.input(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_injected_failure_stops_controller() {
        let sim = SimulatedController::new();
        let (_id, mut rx) = sim.subscribe();
        sim.fail_motion(0, 31);

        let result = sim.move_to(&pose(1.0), 100.0, 200.0, true).await;
        assert_eq!(result, Err(ControllerError::Code(31)));
        assert_eq!(
            rx.recv().await,
            Some(ControllerNotification::ErrorWarn {
                error_code: 31,
                warn_code: 0
            })
        );
        assert!(!sim.status().is_healthy());

        // Stopped controller rejects further motion
        assert!(sim.move_to(&pose(2.0), 100.0, 200.0, true).await.is_err());
        assert_eq!(sim.motion_count(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let sim = SimulatedController::new();
        let (id, _rx) = sim.subscribe();

        assert!(sim.unsubscribe(id));
        assert!(!sim.unsubscribe(id));
        assert_eq!(sim.unsubscribe_count(), 1);
        assert_eq!(sim.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_io_fails() {
        let sim = SimulatedController::new();
        sim.disconnect();
        assert_eq!(
            sim.read_digital(0).await,
            Err(ControllerError::Disconnected)
        );
    }
}
