use core::fmt::{self, Display, Write};

use heapless::String;
use log::error;

use crate::{
    clock::Instant,
    config::{MAX_REQUESTER_LENGTH, MAX_STATUS_LENGTH},
    desk::relay::Direction,
};

pub type RequesterId = String<MAX_REQUESTER_LENGTH>;

/// Fine adjustment alternates between these two
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Pulse {
    /// Relays released, waiting for the desk to come to rest
    Settling { since: Instant, until: Instant },
    Driving {
        direction: Direction,
        since: Instant,
        until: Instant,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Phase {
    Idle,
    /// Waiting for a first valid height before the move can be planned
    Locating { since: Instant },
    CalibratingSpeed {
        attempt: u8,
        window_start: Instant,
        start_height: u16,
    },
    Moving { deadline: Instant },
    FineAdjusting { deadline: Instant, pulse: Pulse },
    ErrorStopped,
}

impl Phase {
    /// A move is in flight
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::ErrorStopped)
    }

    /// What the relays must assert while in this phase
    pub fn output(&self, direction: Direction) -> Direction {
        match self {
            Self::CalibratingSpeed { .. } | Self::Moving { .. } => direction,
            Self::FineAdjusting {
                pulse: Pulse::Driving { direction, .. },
                ..
            } => *direction,
            _ => Direction::Stopped,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Moving { deadline } | Self::FineAdjusting { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Idle => PhaseKind::Idle,
            Self::Locating { .. } => PhaseKind::Locating,
            Self::CalibratingSpeed { .. } => PhaseKind::CalibratingSpeed,
            Self::Moving { .. } => PhaseKind::Moving,
            Self::FineAdjusting { .. } => PhaseKind::FineAdjusting,
            Self::ErrorStopped => PhaseKind::ErrorStopped,
        }
    }
}

/// [`Phase`] without its timing data
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseKind {
    Idle,
    Locating,
    CalibratingSpeed,
    Moving,
    FineAdjusting,
    ErrorStopped,
}

impl PhaseKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Locating => "locating",
            Self::CalibratingSpeed => "calibrating",
            Self::Moving => "moving",
            Self::FineAdjusting => "fine_adjusting",
            Self::ErrorStopped => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Reached,
    AlreadyAtTarget,
    Requested,
    Stall,
    Timeout,
    SensorFault,
}

impl StopReason {
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Stall | Self::Timeout | Self::SensorFault)
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reached => "reached",
            Self::AlreadyAtTarget => "already at target",
            Self::Requested => "stopped",
            Self::Stall => "stall",
            Self::Timeout => "timeout",
            Self::SensorFault => "sensor fault",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeskError {
    TargetOutOfRange { target: u16, min: u16, max: u16 },
}

impl Display for DeskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetOutOfRange { target, min, max } => write!(
                f,
                "target {} mm outside of the allowed range {}..={} mm",
                target, min, max
            ),
        }
    }
}

impl core::error::Error for DeskError {}

/// Read-only snapshot of the desk, taken under the controller lock
#[derive(Clone, Debug, PartialEq)]
pub struct DeskStatus {
    pub phase: PhaseKind,
    pub direction: Direction,
    pub target: Option<u16>,
    pub height: Option<u16>,
    // In mm/s
    pub speed: Option<f32>,
    pub stop_reason: Option<StopReason>,
    pub requester: RequesterId,
}

impl DeskStatus {
    pub fn is_moving(&self) -> bool {
        !matches!(self.phase, PhaseKind::Idle | PhaseKind::ErrorStopped)
    }

    pub fn as_json(&self) -> String<MAX_STATUS_LENGTH> {
        let mut output = String::new();

        if write!(
            output,
            r#"{{"phase":"{}","direction":{},"target":{},"height":{},"speed":{},"stop_reason":{},"requester":"{}"}}"#,
            self.phase.name(),
            self.direction.as_i8(),
            JsonOption(self.target),
            JsonOption(self.height),
            JsonOption(self.speed.map(Tenths)),
            JsonOption(self.stop_reason.map(Quoted)),
            self.requester,
        )
        .is_err()
        {
            error!("Could not write the status. Too long");
        }

        output
    }
}

struct JsonOption<T>(Option<T>);

impl<T: Display> Display for JsonOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("null"),
        }
    }
}

struct Quoted<T>(T);

impl<T: Display> Display for Quoted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

struct Tenths(f32);

impl Display for Tenths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}
