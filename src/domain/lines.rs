//! Digital lines, their roles in the cell, and edge events.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Controller digital line number
pub type LineNumber = u8;

/// What a digital line is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineRole {
    /// Operator start button (input)
    StartSense,

    /// Part present / potting ready (input)
    ReadySense,

    /// Pause switch, edge-triggered (input)
    PauseSense,

    /// Reset button, edge-triggered (input)
    ResetSense,

    /// Indicator lamp / heartbeat (output)
    Indicator,
}

impl fmt::Display for LineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LineRole::StartSense => "start",
            LineRole::ReadySense => "ready",
            LineRole::PauseSense => "pause",
            LineRole::ResetSense => "reset",
            LineRole::Indicator => "indicator",
        };
        f.write_str(name)
    }
}

/// A line number bound to its role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DigitalLine {
    pub number: LineNumber,
    pub role: LineRole,
}

/// Line assignments for the cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMap {
    #[serde(default = "default_start")]
    pub start: LineNumber,

    #[serde(default = "default_ready")]
    pub ready: LineNumber,

    #[serde(default = "default_pause")]
    pub pause: LineNumber,

    #[serde(default = "default_reset")]
    pub reset: LineNumber,

    #[serde(default = "default_indicator")]
    pub indicator: LineNumber,
}

fn default_start() -> LineNumber {
    0
}
fn default_ready() -> LineNumber {
    1
}
fn default_pause() -> LineNumber {
    3
}
fn default_reset() -> LineNumber {
    2
}
fn default_indicator() -> LineNumber {
    8
}

impl Default for LineMap {
    fn default() -> Self {
        Self {
            start: default_start(),
            ready: default_ready(),
            pause: default_pause(),
            reset: default_reset(),
            indicator: default_indicator(),
        }
    }
}

/// Two roles were assigned the same line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line} is assigned to both {first} and {second}")]
pub struct LineConflict {
    pub line: LineNumber,
    pub first: LineRole,
    pub second: LineRole,
}

impl LineMap {
    /// Every line with its role
    pub fn lines(&self) -> [DigitalLine; 5] {
        [
            DigitalLine {
                number: self.start,
                role: LineRole::StartSense,
            },
            DigitalLine {
                number: self.ready,
                role: LineRole::ReadySense,
            },
            DigitalLine {
                number: self.pause,
                role: LineRole::PauseSense,
            },
            DigitalLine {
                number: self.reset,
                role: LineRole::ResetSense,
            },
            DigitalLine {
                number: self.indicator,
                role: LineRole::Indicator,
            },
        ]
    }

    /// Check that no line is shared between roles.
    ///
    /// Start and ready may share a line: a cell with a single part sensor
    /// uses it both to start the pass and to admit each step.
    pub fn validate(&self) -> Result<(), LineConflict> {
        let mut seen: HashMap<LineNumber, LineRole> = HashMap::new();

        for line in self.lines() {
            if let Some(&first) = seen.get(&line.number) {
                let shared_sensor = matches!(
                    (first, line.role),
                    (LineRole::StartSense, LineRole::ReadySense)
                );
                if !shared_sensor {
                    return Err(LineConflict {
                        line: line.number,
                        first,
                        second: line.role,
                    });
                }
                continue;
            }
            seen.insert(line.number, line.role);
        }

        Ok(())
    }
}

/// Direction of a level change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Rising,
    Falling,
}

impl Edge {
    /// The edge that ends at `level`
    pub fn towards(level: bool) -> Self {
        if level {
            Edge::Rising
        } else {
            Edge::Falling
        }
    }
}

/// A detected transition on a monitored line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Line that changed
    pub line: LineNumber,

    /// Level the line changed to
    pub level: bool,

    /// When the poll that saw the change ran
    pub detected_at: DateTime<Utc>,
}

impl EdgeEvent {
    pub fn new(line: LineNumber, level: bool) -> Self {
        Self {
            line,
            level,
            detected_at: Utc::now(),
        }
    }

    pub fn edge(&self) -> Edge {
        Edge::towards(self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_line_map_is_valid() {
        let lines = LineMap::default();
        assert!(lines.validate().is_ok());
        assert_eq!(lines.indicator, 8);
    }

    #[test]
    fn test_start_and_ready_may_share() {
        let lines = LineMap {
            start: 1,
            ready: 1,
            ..Default::default()
        };
        assert!(lines.validate().is_ok());
    }

    #[test]
    fn test_pause_and_reset_conflict() {
        let lines = LineMap {
            pause: 2,
            reset: 2,
            ..Default::default()
        };
        let err = lines.validate().unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.first, LineRole::PauseSense);
        assert_eq!(err.second, LineRole::ResetSense);
    }

    #[test]
    fn test_indicator_cannot_share_input() {
        let lines = LineMap {
            indicator: 0,
            ..Default::default()
        };
        assert!(lines.validate().is_err());
    }

    #[test]
    fn test_edge_direction() {
        assert_eq!(EdgeEvent::new(3, true).edge(), Edge::Rising);
        assert_eq!(EdgeEvent::new(3, false).edge(), Edge::Falling);
    }
}
