use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Subset of {create, read, update, delete, share}.
///
/// The bit layout is part of every permission MAC, so it must not change.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "CapabilityFlags", into = "CapabilityFlags")]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const CREATE: Self = Self(1);
    pub const READ: Self = Self(1 << 1);
    pub const UPDATE: Self = Self(1 << 2);
    pub const DELETE: Self = Self(1 << 3);
    pub const SHARE: Self = Self(1 << 4);
    pub const FULL: Self = Self(0b1_1111);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Unknown bits are dropped.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::FULL.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capabilities({self})")
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters = [
            (Self::CREATE, 'C'),
            (Self::READ, 'R'),
            (Self::UPDATE, 'U'),
            (Self::DELETE, 'D'),
            (Self::SHARE, 'S'),
        ];
        for (cap, letter) in letters {
            if self.contains(cap) {
                write!(f, "{letter}")?;
            } else {
                write!(f, "-")?;
            }
        }
        Ok(())
    }
}

/// JSON shape of a capability set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityFlags {
    pub allow_create: bool,
    pub allow_read: bool,
    pub allow_update: bool,
    pub allow_delete: bool,
    pub allow_share: bool,
}

impl From<CapabilityFlags> for Capabilities {
    fn from(flags: CapabilityFlags) -> Self {
        let mut caps = Capabilities::NONE;
        for (set, cap) in [
            (flags.allow_create, Capabilities::CREATE),
            (flags.allow_read, Capabilities::READ),
            (flags.allow_update, Capabilities::UPDATE),
            (flags.allow_delete, Capabilities::DELETE),
            (flags.allow_share, Capabilities::SHARE),
        ] {
            if set {
                caps |= cap;
            }
        }
        caps
    }
}

impl From<Capabilities> for CapabilityFlags {
    fn from(caps: Capabilities) -> Self {
        Self {
            allow_create: caps.contains(Capabilities::CREATE),
            allow_read: caps.contains(Capabilities::READ),
            allow_update: caps.contains(Capabilities::UPDATE),
            allow_delete: caps.contains(Capabilities::DELETE),
            allow_share: caps.contains(Capabilities::SHARE),
        }
    }
}
