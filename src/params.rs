//! Global instrument parameters shared by every voice.

use std::sync::atomic::{AtomicU32, Ordering};

/// Host-visible parameter identifiers.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterId {
    /// Output gain.
    Volume = 0,
    /// Envelope attack time in seconds.
    AttackTime = 1,
    /// Envelope release time in seconds.
    ReleaseTime = 2,
}

impl ParameterId {
    /// Every parameter, in id order.
    pub const ALL: [ParameterId; 3] = [
        ParameterId::Volume,
        ParameterId::AttackTime,
        ParameterId::ReleaseTime,
    ];

    /// Range and default for this parameter.
    pub fn info(self) -> ParameterInfo {
        match self {
            ParameterId::Volume => ParameterInfo {
                name: "global volume",
                unit: ParameterUnit::LinearGain,
                min: 0.0,
                max: 1.0,
                default: 1.0,
            },
            ParameterId::AttackTime => ParameterInfo {
                name: "VCA attack",
                unit: ParameterUnit::Seconds,
                min: 0.001,
                max: 5.0,
                default: 0.001,
            },
            ParameterId::ReleaseTime => ParameterInfo {
                name: "VCA release",
                unit: ParameterUnit::Seconds,
                min: 0.001,
                max: 5.0,
                default: 0.001,
            },
        }
    }
}

impl TryFrom<u32> for ParameterId {
    type Error = ParameterError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(ParameterId::Volume),
            1 => Ok(ParameterId::AttackTime),
            2 => Ok(ParameterId::ReleaseTime),
            other => Err(ParameterError::Unknown(other)),
        }
    }
}

/// Unit a host should display next to a parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterUnit {
    /// Linear amplitude multiplier.
    LinearGain,
    /// Seconds.
    Seconds,
}

/// Static description of a parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterInfo {
    /// Display name.
    pub name: &'static str,
    /// Display unit.
    pub unit: ParameterUnit,
    /// Lowest accepted value.
    pub min: f32,
    /// Highest accepted value.
    pub max: f32,
    /// Initial value.
    pub default: f32,
}

/// Parameter lookup failures.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParameterError {
    /// The raw id does not name a parameter.
    #[error("unknown parameter id: {0}")]
    Unknown(u32),
}

/// Values read by the render thread once per block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterSnapshot {
    /// Output gain.
    pub volume: f32,
    /// Attack seconds.
    pub attack_time: f32,
    /// Release seconds.
    pub release_time: f32,
}

/// Atomic parameter store. The host thread writes, the render thread reads.
pub struct Parameters {
    values: [AtomicU32; 3],
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new()
    }
}

impl Parameters {
    /// Store populated with each parameter's default.
    pub fn new() -> Self {
        Self {
            values: ParameterId::ALL.map(|id| AtomicU32::new(id.info().default.to_bits())),
        }
    }

    /// Current value.
    pub fn get(&self, id: ParameterId) -> f32 {
        f32::from_bits(self.values[id as usize].load(Ordering::Relaxed))
    }

    /// Set a value, clamped into the parameter's range. Returns the stored value.
    /// NaN falls back to the default.
    pub fn set(&self, id: ParameterId, value: f32) -> f32 {
        let info = id.info();
        let value = if value.is_nan() {
            info.default
        } else {
            value.clamp(info.min, info.max)
        };
        self.values[id as usize].store(value.to_bits(), Ordering::Relaxed);
        value
    }

    /// Read all three values.
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            volume: self.get(ParameterId::Volume),
            attack_time: self.get(ParameterId::AttackTime),
            release_time: self.get(ParameterId::ReleaseTime),
        }
    }
}
