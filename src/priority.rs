use crate::{
    error::{Error, Result},
    platform::{OsPlatform, Platform},
};
use std::fmt;

/// Abstract scheduling priority, independent of the host's native scale.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// OS scheduling policy which gives meaning to a native priority value.
///
/// [`Policy::Other`] is the default time-shared policy and the only one for
/// which native values are mapped back onto the five [`Priority`] levels.
/// The real-time policies are treated as opaque "highest effort".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Policy {
    Other,
    Fifo,
    RoundRobin,
}

impl Default for Policy {
    fn default() -> Self {
        Self::Other
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Other => "SCHED_OTHER",
            Self::Fifo => "SCHED_FIFO",
            Self::RoundRobin => "SCHED_RR",
        })
    }
}

/// The inclusive range of native priority values of a policy.
///
/// Levels are spread over the range in quartiles:
/// `Lowest = min`, `Low = min + Δ/4`, `Normal = min + Δ/2`,
/// `High = min + 3Δ/4` and `Highest = max` where `Δ = max - min`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PriorityRange {
    pub min: i32,
    pub max: i32,
}

impl PriorityRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Query the host for the range of `policy`.
    pub fn of(policy: Policy) -> Result<Self> {
        OsPlatform::priority_range(policy)
            .map(|(min, max)| Self::new(min, max))
            .ok_or(Error::PriorityRange(policy))
    }

    fn delta(&self) -> i64 {
        self.max as i64 - self.min as i64
    }

    fn quartile(&self, quarters: i64) -> i32 {
        (self.min as i64 + quarters * self.delta() / 4) as i32
    }

    pub fn to_native(&self, priority: Priority) -> i32 {
        match priority {
            Priority::Lowest => self.min,
            Priority::Low => self.quartile(1),
            Priority::Normal => self.quartile(2),
            Priority::High => self.quartile(3),
            Priority::Highest => self.max,
        }
    }

    /// Classify a native value against the same quartile boundaries used by
    /// [`to_native`](Self::to_native).
    pub fn from_native(&self, value: i32) -> Priority {
        let normal = self.quartile(2);
        if value == self.max {
            Priority::Highest
        } else if value > normal {
            Priority::High
        } else if value == normal {
            Priority::Normal
        } else if value > self.min {
            Priority::Low
        } else {
            Priority::Lowest
        }
    }
}

/// Map a priority level onto the native scale of `policy`.
pub fn to_native(priority: Priority, policy: Policy) -> Result<i32> {
    PriorityRange::of(policy).map(|range| range.to_native(priority))
}

/// Map a native value of `policy` back onto a priority level.
///
/// Anything scheduled under a non-default policy reports [`Priority::Highest`].
pub fn from_native(value: i32, policy: Policy) -> Result<Priority> {
    match policy {
        Policy::Other => PriorityRange::of(policy).map(|range| range.from_native(value)),
        Policy::Fifo | Policy::RoundRobin => Ok(Priority::Highest),
    }
}

pub fn min_os_priority(policy: Policy) -> Result<i32> {
    PriorityRange::of(policy).map(|range| range.min)
}

pub fn max_os_priority(policy: Policy) -> Result<i32> {
    PriorityRange::of(policy).map(|range| range.max)
}
