#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Stopped,
    Up,
    Down,
}

impl Direction {
    /// The direction to travel from `from` to reach `to`
    pub fn towards(from: u16, to: u16) -> Self {
        match to.cmp(&from) {
            core::cmp::Ordering::Greater => Self::Up,
            core::cmp::Ordering::Less => Self::Down,
            core::cmp::Ordering::Equal => Self::Stopped,
        }
    }

    /// Distance left to `target` when travelling in this direction.
    /// Negative once the target has been passed
    pub fn remaining(&self, height: u16, target: u16) -> i32 {
        let diff = target as i32 - height as i32;
        match self {
            Self::Up => diff,
            Self::Down => -diff,
            Self::Stopped => -(diff.abs()),
        }
    }

    /// Distance covered from `start` to `end` in this direction
    pub fn progress(&self, start: u16, end: u16) -> i32 {
        let diff = end as i32 - start as i32;
        match self {
            Self::Up => diff,
            Self::Down => -diff,
            Self::Stopped => 0,
        }
    }

    pub fn as_i8(&self) -> i8 {
        match self {
            Self::Stopped => 0,
            Self::Up => 1,
            Self::Down => -1,
        }
    }
}

/// The two relays driving the actuator. Only the desk controller owns them
pub trait Relays {
    /// Energize the relay for `direction`, releasing the other one.
    /// `Direction::Stopped` releases both
    fn drive(&mut self, direction: Direction);
}
