//! Sequence plans: the fixed, ordered list of motions a pass executes.
//!
//! Plans are written in YAML. Each entry is tagged with its `type`:
//!
//! ```yaml
//! name: demo
//! speed: 200
//! accel: 2000
//! steps:
//!   - type: move_to
//!     label: Pin1
//!     pose: [364.2, 195.3, 442.3, 180.0, 0.0, 0.0]
//!     wait: false
//!     dwell_ms: 1000
//!   - type: arc_through
//!     via: [367.7, 245.3, 442.3, 180.0, 0.0, 0.0]
//!     to: [360.7, 245.3, 442.3, 180.0, 0.0, 0.0]
//!   - type: circle
//!     start: [378.0, 254.0, -9.9, -180.0, 0.0, -29.9]
//!     diameter: 100
//! ```
//!
//! `circle` entries are expanded into an arc at load time.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::pose::{circle_poses, JointAngles, Pose};

/// Problems found while building or validating a plan
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("Plan name cannot be empty")]
    EmptyName,

    #[error("Plan must have at least one step")]
    Empty,

    #[error("Step {step}: speed must be positive and finite, got {value}")]
    InvalidSpeed { step: String, value: f64 },

    #[error("Step {step}: acceleration must be positive and finite, got {value}")]
    InvalidAccel { step: String, value: f64 },

    #[error("Step {step}: pose is not finite")]
    NonFinitePose { step: String },

    #[error("Step {step}: arc poses coincide")]
    DegenerateArc { step: String },

    #[error("Step {step}: arc percent must be positive, got {value}")]
    InvalidPercent { step: String, value: f64 },

    #[error("Step {step}: circle diameter must be positive, got {value}")]
    InvalidDiameter { step: String, value: f64 },

    #[error("Home pose is not finite")]
    NonFiniteHome,

    #[error("Safe move is invalid: {0}")]
    InvalidSafeMove(String),
}

/// The motion a step performs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Motion {
    /// Linear move of the tool centre point
    MoveTo { pose: Pose },

    /// Circular move through `via` and `to`; `percent` of a full circle
    ArcThrough { via: Pose, to: Pose, percent: f64 },
}

/// One unit of work in a plan. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionStep {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(flatten)]
    pub motion: Motion,

    /// mm/s
    pub speed: f64,

    /// mm/s²
    pub accel: f64,

    /// Block until the controller finishes the move
    pub wait: bool,

    /// Pause after the move, in milliseconds
    pub dwell_ms: u64,
}

impl MotionStep {
    pub fn move_to(pose: Pose, speed: f64, accel: f64) -> Self {
        Self {
            label: None,
            motion: Motion::MoveTo { pose },
            speed,
            accel,
            wait: true,
            dwell_ms: 0,
        }
    }

    pub fn arc_through(via: Pose, to: Pose, speed: f64, accel: f64) -> Self {
        Self {
            label: None,
            motion: Motion::ArcThrough {
                via,
                to,
                percent: 100.0,
            },
            speed,
            accel,
            wait: true,
            dwell_ms: 0,
        }
    }

    /// Full circle of `diameter` starting at `start`
    pub fn circle(start: Pose, diameter: f64, speed: f64, accel: f64) -> Self {
        let (via, to) = circle_poses(&start, diameter);
        Self::arc_through(via, to, speed, accel)
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_dwell(mut self, dwell_ms: u64) -> Self {
        self.dwell_ms = dwell_ms;
        self
    }

    pub fn non_blocking(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Name used in logs: the label if set, otherwise the index
    pub fn describe(&self, index: usize) -> String {
        match &self.label {
            Some(label) => format!("{} ({})", index, label),
            None => index.to_string(),
        }
    }

    fn validate(&self, index: usize) -> Result<(), PlanError> {
        let step = self.describe(index);

        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(PlanError::InvalidSpeed {
                step,
                value: self.speed,
            });
        }
        if !(self.accel.is_finite() && self.accel > 0.0) {
            return Err(PlanError::InvalidAccel {
                step,
                value: self.accel,
            });
        }

        match &self.motion {
            Motion::MoveTo { pose } => {
                if !pose.is_finite() {
                    return Err(PlanError::NonFinitePose { step });
                }
            }
            Motion::ArcThrough { via, to, percent } => {
                if !via.is_finite() || !to.is_finite() {
                    return Err(PlanError::NonFinitePose { step });
                }
                if via == to {
                    return Err(PlanError::DegenerateArc { step });
                }
                if !(percent.is_finite() && *percent > 0.0) {
                    return Err(PlanError::InvalidPercent {
                        step,
                        value: *percent,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Action that parks the arm after a reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SafeMove {
    /// Joint-space move to fixed angles (°/s, °/s²)
    Joints {
        angles: JointAngles,
        #[serde(default = "default_joint_speed")]
        speed: f64,
        #[serde(default = "default_joint_accel")]
        accel: f64,
    },

    /// Sweep through a list of waypoints (mm/s, mm/s²)
    Path {
        poses: Vec<Pose>,
        #[serde(default = "default_speed")]
        speed: f64,
        #[serde(default = "default_accel")]
        accel: f64,
    },
}

fn default_joint_speed() -> f64 {
    50.0
}
fn default_joint_accel() -> f64 {
    100.0
}

impl Default for SafeMove {
    fn default() -> Self {
        Self::Joints {
            angles: JointAngles([3.5, -62.4, -41.9, 0.0, 104.2, 3.5]),
            speed: default_joint_speed(),
            accel: default_joint_accel(),
        }
    }
}

impl SafeMove {
    fn validate(&self) -> Result<(), PlanError> {
        let (speed, accel) = match self {
            SafeMove::Joints {
                angles,
                speed,
                accel,
            } => {
                if !angles.is_finite() {
                    return Err(PlanError::InvalidSafeMove(
                        "joint angles are not finite".to_string(),
                    ));
                }
                (*speed, *accel)
            }
            SafeMove::Path {
                poses,
                speed,
                accel,
            } => {
                if poses.is_empty() {
                    return Err(PlanError::InvalidSafeMove(
                        "path has no waypoints".to_string(),
                    ));
                }
                if poses.iter().any(|p| !p.is_finite()) {
                    return Err(PlanError::InvalidSafeMove(
                        "path contains a non-finite pose".to_string(),
                    ));
                }
                (*speed, *accel)
            }
        };

        if !(speed.is_finite() && speed > 0.0 && accel.is_finite() && accel > 0.0) {
            return Err(PlanError::InvalidSafeMove(format!(
                "speed {} / accel {} must be positive",
                speed, accel
            )));
        }
        Ok(())
    }
}

fn default_speed() -> f64 {
    100.0
}
fn default_accel() -> f64 {
    2000.0
}
fn default_home() -> Pose {
    Pose::new(136.0, 215.3, 620.8, 180.0, 0.0, 0.0)
}
fn default_wait() -> bool {
    true
}
fn default_percent() -> f64 {
    100.0
}

/// A step as written in a plan file; speed/accel fall back to plan defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    MoveTo {
        label: Option<String>,
        pose: Pose,
        speed: Option<f64>,
        accel: Option<f64>,
        #[serde(default = "default_wait")]
        wait: bool,
        #[serde(default)]
        dwell_ms: u64,
    },
    ArcThrough {
        label: Option<String>,
        via: Pose,
        to: Pose,
        #[serde(default = "default_percent")]
        percent: f64,
        speed: Option<f64>,
        accel: Option<f64>,
        #[serde(default = "default_wait")]
        wait: bool,
        #[serde(default)]
        dwell_ms: u64,
    },
    Circle {
        label: Option<String>,
        start: Pose,
        diameter: f64,
        speed: Option<f64>,
        accel: Option<f64>,
        #[serde(default = "default_wait")]
        wait: bool,
        #[serde(default)]
        dwell_ms: u64,
    },
}

impl StepSpec {
    fn resolve(self, index: usize, speed: f64, accel: f64) -> Result<MotionStep, PlanError> {
        let (label, motion, s, a, wait, dwell_ms) = match self {
            StepSpec::MoveTo {
                label,
                pose,
                speed,
                accel,
                wait,
                dwell_ms,
            } => (label, Motion::MoveTo { pose }, speed, accel, wait, dwell_ms),
            StepSpec::ArcThrough {
                label,
                via,
                to,
                percent,
                speed,
                accel,
                wait,
                dwell_ms,
            } => (
                label,
                Motion::ArcThrough { via, to, percent },
                speed,
                accel,
                wait,
                dwell_ms,
            ),
            StepSpec::Circle {
                label,
                start,
                diameter,
                speed,
                accel,
                wait,
                dwell_ms,
            } => {
                if !(diameter.is_finite() && diameter > 0.0) {
                    let step = match &label {
                        Some(l) => format!("{} ({})", index, l),
                        None => index.to_string(),
                    };
                    return Err(PlanError::InvalidDiameter {
                        step,
                        value: diameter,
                    });
                }
                let (via, to) = circle_poses(&start, diameter);
                (
                    label,
                    Motion::ArcThrough {
                        via,
                        to,
                        percent: 100.0,
                    },
                    speed,
                    accel,
                    wait,
                    dwell_ms,
                )
            }
        };

        Ok(MotionStep {
            label,
            motion,
            speed: s.unwrap_or(speed),
            accel: a.unwrap_or(accel),
            wait,
            dwell_ms,
        })
    }
}

/// Raw plan file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct PlanFile {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Default TCP speed for steps and the home move (mm/s)
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Default TCP acceleration (mm/s²)
    #[serde(default = "default_accel")]
    pub accel: f64,

    #[serde(default = "default_home")]
    pub home: Pose,

    #[serde(default)]
    pub safe_move: SafeMove,

    pub steps: Vec<StepSpec>,
}

impl PlanFile {
    pub fn into_plan(self) -> Result<SequencePlan, PlanError> {
        let (speed, accel) = (self.speed, self.accel);
        let steps = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, spec)| spec.resolve(i, speed, accel))
            .collect::<Result<Vec<_>, _>>()?;

        let plan = SequencePlan {
            name: self.name,
            description: self.description,
            home: self.home,
            home_speed: speed,
            home_accel: accel,
            safe_move: self.safe_move,
            steps,
        };
        plan.validate()?;
        Ok(plan)
    }
}

/// Ordered, non-empty list of motion steps, fixed for the life of the process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencePlan {
    name: String,
    description: String,
    home: Pose,
    home_speed: f64,
    home_accel: f64,
    safe_move: SafeMove,
    steps: Vec<MotionStep>,
}

impl SequencePlan {
    /// Build a plan with the default home pose and safe move
    pub fn new(name: impl Into<String>, steps: Vec<MotionStep>) -> Result<Self, PlanError> {
        let plan = Self {
            name: name.into(),
            description: String::new(),
            home: default_home(),
            home_speed: default_speed(),
            home_accel: default_accel(),
            safe_move: SafeMove::default(),
            steps,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Load a plan from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid plan file: {}", path.display()))
    }

    /// Parse a plan from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: PlanFile = serde_yaml::from_str(content).context("Failed to parse plan YAML")?;
        Ok(file.into_plan()?)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        if self.name.is_empty() {
            return Err(PlanError::EmptyName);
        }
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        if !self.home.is_finite() {
            return Err(PlanError::NonFiniteHome);
        }
        if !(self.home_speed.is_finite() && self.home_speed > 0.0) {
            return Err(PlanError::InvalidSpeed {
                step: "home".to_string(),
                value: self.home_speed,
            });
        }
        if !(self.home_accel.is_finite() && self.home_accel > 0.0) {
            return Err(PlanError::InvalidAccel {
                step: "home".to_string(),
                value: self.home_accel,
            });
        }
        self.safe_move.validate()?;

        for (i, step) in self.steps.iter().enumerate() {
            step.validate(i)?;
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn steps(&self) -> &[MotionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always false for a validated plan
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn home(&self) -> Pose {
        self.home
    }

    pub fn home_speed(&self) -> f64 {
        self.home_speed
    }

    pub fn home_accel(&self) -> f64 {
        self.home_accel
    }

    pub fn safe_move(&self) -> &SafeMove {
        &self.safe_move
    }

    /// First 16 hex chars of the SHA-256 of the plan's JSON form
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..8])
    }
}
