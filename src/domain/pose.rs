//! Cartesian poses and joint targets.
//!
//! Pose tables are written as six-element arrays, so both types
//! (de)serialize from `[f64; 6]`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tool-centre-point pose.
///
/// `x`, `y`, `z` are millimetres; `roll`, `pitch`, `yaw` are degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 6]", into = "[f64; 6]")]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl Pose {
    pub const fn new(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self {
            x,
            y,
            z,
            roll,
            pitch,
            yaw,
        }
    }

    /// All six fields as an array, in controller order
    pub fn to_array(self) -> [f64; 6] {
        [self.x, self.y, self.z, self.roll, self.pitch, self.yaw]
    }

    /// True if every field is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl From<[f64; 6]> for Pose {
    fn from(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }
}

impl From<Pose> for [f64; 6] {
    fn from(p: Pose) -> Self {
        p.to_array()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.1}, {:.1}, {:.1}, {:.1}, {:.1}, {:.1}]",
            self.x, self.y, self.z, self.roll, self.pitch, self.yaw
        )
    }
}

/// Six joint angles in degrees, used for joint-space moves
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointAngles(pub [f64; 6]);

impl JointAngles {
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl fmt::Display for JointAngles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|a| format!("{:.1}", a)).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// The two arc poses that trace a full circle of `diameter` starting at `start`.
///
/// The circle's centre sits `diameter / 2` below the start in Y; the arc runs
/// through the points either side of the centre on the X axis. Height and
/// orientation are copied from `start`.
pub fn circle_poses(start: &Pose, diameter: f64) -> (Pose, Pose) {
    let radius = diameter / 2.0;
    let center_x = start.x;
    let center_y = start.y - radius;

    let via = Pose {
        x: center_x + radius,
        y: center_y,
        ..*start
    };
    let to = Pose {
        x: center_x - radius,
        y: center_y,
        ..*start
    };

    (via, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_array_round_trip_from_yaml() {
        let pose: Pose = serde_yaml::from_str("[136.0, 215.3, 620.8, 180.0, 0.0, 0.0]").unwrap();
        assert_eq!(pose.x, 136.0);
        assert_eq!(pose.z, 620.8);
        assert_eq!(pose.roll, 180.0);
    }

    #[test]
    fn test_circle_poses() {
        let start = Pose::new(378.0, 254.0, -9.9, -180.0, 0.0, -29.9);
        let (via, to) = circle_poses(&start, 100.0);

        assert_eq!(via.x, 428.0);
        assert_eq!(via.y, 204.0);
        assert_eq!(to.x, 328.0);
        assert_eq!(to.y, 204.0);
        // Height and orientation are carried over
        assert_eq!(via.z, start.z);
        assert_eq!(to.yaw, start.yaw);
    }

    #[test]
    fn test_non_finite_pose() {
        let pose = Pose::new(f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(!pose.is_finite());
        assert!(Pose::new(1.0, 2.0, 3.0, 180.0, 0.0, 0.0).is_finite());
    }
}
