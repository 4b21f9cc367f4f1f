//! The two participant kinds in a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which side of a pairing a connection speaks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The desktop side.
    Workstation,
    /// The mobile side.
    Phone,
}

impl Role {
    /// Both roles, in slot order.
    pub const ALL: [Role; 2] = [Role::Workstation, Role::Phone];

    /// The role this one relays to.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Workstation => Self::Phone,
            Self::Phone => Self::Workstation,
        }
    }

    /// Fixed slot index used by per-session role tables.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Workstation => 0,
            Self::Phone => 1,
        }
    }

    /// Wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Workstation => "workstation",
            Self::Phone => "phone",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "workstation" => Ok(Self::Workstation),
            "phone" => Ok(Self::Phone),
            other => Err(other.to_owned()),
        }
    }
}
