//! Register maps of the supported device profiles.

/// Channel fed by the first input register pair of the sample profile.
pub const CHANNEL_1: &str = "channel1";

/// One polled register and the channel its value is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterEntry {
    /// Input register offset (0-based).
    pub offset: u16,
    /// Channel identifier.
    pub channel_id: &'static str,
}

const SAMPLE_REGISTERS: &[RegisterEntry] = &[RegisterEntry {
    offset: 6,
    channel_id: CHANNEL_1,
}];

/// Immutable offset-to-channel table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    entries: &'static [RegisterEntry],
}

impl RegisterMap {
    pub const fn new(entries: &'static [RegisterEntry]) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &'static [RegisterEntry] {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Channel published for a register offset.
    pub fn channel_for(&self, offset: u16) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|entry| entry.offset == offset)
            .map(|entry| entry.channel_id)
    }
}

/// Supported thing types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceProfile {
    /// The only profile shipped: one f32 at input register 6.
    Sample,
}

impl DeviceProfile {
    pub const ALL: &'static [DeviceProfile] = &[DeviceProfile::Sample];

    /// Thing type identifier used in configuration.
    pub fn thing_type(&self) -> &'static str {
        match self {
            DeviceProfile::Sample => "sample",
        }
    }

    /// Look up a profile by its thing type identifier.
    pub fn from_thing_type(thing_type: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|profile| profile.thing_type() == thing_type)
    }

    pub fn register_map(&self) -> RegisterMap {
        match self {
            DeviceProfile::Sample => RegisterMap::new(SAMPLE_REGISTERS),
        }
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.thing_type())
    }
}
